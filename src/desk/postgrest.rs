//! Ticket store backed by a PostgREST endpoint (Supabase REST API).

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;

use super::models::{LookupKey, RepairRequest, TicketPatch};
use super::store::TicketStore;
use crate::errors::StoreError;

/// Error body returned by PostgREST on a refused request.
#[derive(Debug, Default, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

pub struct PostgrestStore {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
    table: String,
}

impl PostgrestStore {
    pub fn new(base_url: &str, service_key: &str, table: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            table: table.to_string(),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn request(&self, method: Method) -> RequestBuilder {
        self.client
            .request(method, self.table_url())
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    fn eq_filter(key: LookupKey, value: &str) -> [(&'static str, String); 1] {
        [(key.column(), format!("eq.{}", value))]
    }
}

/// Map a non-2xx response to `StoreError::Rejected`, keeping PostgREST's message text.
async fn check(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let parsed: PostgrestErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let message = match parsed.message {
        Some(message) => message,
        None if !body.trim().is_empty() => body,
        None => format!("PostgREST returned {}", status),
    };
    tracing::debug!(
        %status,
        code = ?parsed.code,
        details = ?parsed.details,
        hint = ?parsed.hint,
        "PostgREST rejected request"
    );
    Err(StoreError::Rejected {
        message,
        code: parsed.code,
    })
}

async fn rows(resp: Response) -> Result<Vec<RepairRequest>, StoreError> {
    let resp = check(resp).await?;
    Ok(resp.json::<Vec<RepairRequest>>().await?)
}

#[async_trait]
impl TicketStore for PostgrestStore {
    fn backend(&self) -> &'static str {
        "postgrest"
    }

    async fn insert(&self, ticket: RepairRequest) -> Result<RepairRequest, StoreError> {
        // Unset optional columns are omitted so an older table without them still accepts the row.
        let mut body = serde_json::to_value(&ticket)
            .map_err(|e| StoreError::Other(anyhow::anyhow!("Failed to encode ticket: {}", e)))?;
        if let Some(object) = body.as_object_mut() {
            object.retain(|_, v| !v.is_null());
        }

        let resp = self
            .request(Method::POST)
            .header("Prefer", "return=representation")
            .json(&[body])
            .send()
            .await?;
        rows(resp).await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::rejected("Insert returned no rows"))
    }

    async fn list(&self) -> Result<Vec<RepairRequest>, StoreError> {
        let resp = self
            .request(Method::GET)
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send()
            .await?;
        rows(resp).await
    }

    async fn find(&self, key: LookupKey, value: &str) -> Result<Option<RepairRequest>, StoreError> {
        let resp = self
            .request(Method::GET)
            .query(&[("select", "*"), ("limit", "1")])
            .query(&Self::eq_filter(key, value))
            .send()
            .await?;
        Ok(rows(resp).await?.into_iter().next())
    }

    async fn update(
        &self,
        key: LookupKey,
        value: &str,
        patch: &TicketPatch,
    ) -> Result<Vec<RepairRequest>, StoreError> {
        if patch.is_empty() {
            return Err(StoreError::EmptyPatch);
        }
        let resp = self
            .request(Method::PATCH)
            .header("Prefer", "return=representation")
            .query(&Self::eq_filter(key, value))
            .json(patch)
            .send()
            .await?;
        rows(resp).await
    }

    async fn delete(&self, key: LookupKey, value: &str) -> Result<bool, StoreError> {
        let resp = self
            .request(Method::DELETE)
            .header("Prefer", "return=representation")
            .query(&Self::eq_filter(key, value))
            .send()
            .await?;
        Ok(!rows(resp).await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desk::models::{NewRepairRequest, RepairStatus, columns};
    use crate::desk::test_support::spawn_mock;
    use axum::Json;
    use axum::Router;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::get;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    const TABLE_PATH: &str = "/rest/v1/repair_requests";

    fn row(job_id: &str, status: &str) -> Value {
        json!({
            "id": format!("id-{}", job_id),
            "job_id": job_id,
            "full_name": "Somchai",
            "device": "Printer",
            "device_id": "PR-01",
            "issue": "Paper jam",
            "status": status,
            "created_at": "2026-01-01T00:00:00.000Z",
            "updated_at": "2026-01-01T00:00:00.000Z"
        })
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("apikey").and_then(|v| v.to_str().ok()) == Some("service")
            && headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer service")
    }

    async fn list_handler(
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> AxumResponse {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        match params.get("job_id").map(String::as_str) {
            Some("eq.JOB-1") => Json(json!([row("JOB-1", "pending")])).into_response(),
            Some("eq.LEGACY") => Json(json!([{
                "id": 42,
                "job_id": "LEGACY",
                "full_name": null,
                "device": null,
                "device_id": null,
                "issue": "Screen flicker",
                "status": "approved",
                "created_at": "2025-06-01T08:00:00.000Z",
                "updated_at": null
            }]))
            .into_response(),
            Some(_) => Json(json!([])).into_response(),
            None => {
                assert_eq!(params.get("order").map(String::as_str), Some("created_at.desc"));
                Json(json!([row("JOB-2", "pending"), row("JOB-1", "completed")])).into_response()
            }
        }
    }

    async fn patch_handler(
        Query(params): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> AxumResponse {
        if body.get("receipt_no").is_some() {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "code": "PGRST204",
                    "message": "Could not find the 'receipt_no' column of 'repair_requests' in the schema cache",
                    "details": null,
                    "hint": null
                })),
            )
                .into_response();
        }
        let job_id = params
            .get("job_id")
            .and_then(|v| v.strip_prefix("eq."))
            .unwrap_or("none")
            .to_string();
        let status = body["status"].as_str().unwrap_or("pending");
        Json(json!([row(&job_id, status)])).into_response()
    }

    async fn post_handler(headers: HeaderMap, Json(body): Json<Value>) -> AxumResponse {
        assert_eq!(
            headers.get("prefer").and_then(|v| v.to_str().ok()),
            Some("return=representation")
        );
        // Echo the submitted rows back as the stored representation.
        Json(body).into_response()
    }

    async fn delete_handler(Query(params): Query<HashMap<String, String>>) -> AxumResponse {
        if params.get("id").map(String::as_str) == Some("eq.id-JOB-1") {
            Json(json!([row("JOB-1", "pending")])).into_response()
        } else {
            Json(json!([])).into_response()
        }
    }

    async fn mock_store() -> PostgrestStore {
        let app = Router::new().route(
            TABLE_PATH,
            get(list_handler)
                .patch(patch_handler)
                .post(post_handler)
                .delete(delete_handler),
        );
        let base = spawn_mock(app).await;
        PostgrestStore::new(&format!("{}/", base), "service", "repair_requests")
    }

    #[tokio::test]
    async fn test_list_sends_credentials_and_order() {
        let store = mock_store().await;
        let tickets = store.list().await.unwrap();
        assert_eq!(tickets.len(), 2);
        assert_eq!(tickets[1].status, RepairStatus::Completed);
    }

    #[tokio::test]
    async fn test_rows_with_nulls_and_numeric_id_still_read() {
        let store = mock_store().await;
        let ticket = store
            .find(LookupKey::JobId, "LEGACY")
            .await
            .unwrap()
            .expect("legacy row should be returned");
        assert_eq!(ticket.id, "42");
        assert_eq!(ticket.full_name, "");
        assert_eq!(ticket.device, "");
        assert_eq!(ticket.issue, "Screen flicker");
        assert_eq!(ticket.status, RepairStatus::Pending);
        assert_eq!(ticket.updated_at, "");
    }

    #[tokio::test]
    async fn test_find_uses_eq_filter() {
        let store = mock_store().await;
        let found = store.find(LookupKey::JobId, "JOB-1").await.unwrap();
        assert_eq!(found.map(|t| t.job_id), Some("JOB-1".to_string()));
        assert!(store.find(LookupKey::JobId, "JOB-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_returns_representation() {
        let store = mock_store().await;
        let patch = TicketPatch::new().set(columns::STATUS, "in-progress");
        let rows = store.update(LookupKey::JobId, "JOB-7", &patch).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_id, "JOB-7");
        assert_eq!(rows[0].status, RepairStatus::InProgress);
    }

    #[tokio::test]
    async fn test_update_missing_column_keeps_postgrest_message() {
        let store = mock_store().await;
        let patch = TicketPatch::new()
            .set(columns::STATUS, "completed")
            .set(columns::RECEIPT_NO, "R-1");
        let err = store.update(LookupKey::JobId, "JOB-1", &patch).await.unwrap_err();
        match err {
            StoreError::Rejected { message, code } => {
                assert!(message.starts_with("Could not find the 'receipt_no' column"));
                assert_eq!(code.as_deref(), Some("PGRST204"));
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_insert_omits_null_columns() {
        let store = mock_store().await;
        let ticket = NewRepairRequest {
            full_name: "Somchai".into(),
            device: "Printer".into(),
            device_id: "PR-01".into(),
            issue: "Paper jam".into(),
            ..Default::default()
        }
        .into_ticket(None);
        let saved = store.insert(ticket.clone()).await.unwrap();
        assert_eq!(saved.job_id, ticket.job_id);
        assert!(saved.receipt_no.is_none());
    }

    #[tokio::test]
    async fn test_delete_reports_whether_rows_matched() {
        let store = mock_store().await;
        assert!(store.delete(LookupKey::Id, "id-JOB-1").await.unwrap());
        assert!(!store.delete(LookupKey::Id, "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_patch_is_refused_locally() {
        let store = PostgrestStore::new("http://127.0.0.1:9", "k", "t");
        assert!(matches!(
            store.update(LookupKey::Id, "x", &TicketPatch::new()).await,
            Err(StoreError::EmptyPatch)
        ));
    }
}
