use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;

use super::auth::{
    AdminSession, SESSION_MAX_AGE_SECS, cleared_session_cookie, login, session_cookie,
};
use super::export::export_reports;
use super::line::{LineClient, new_ticket_flex, ticket_summary};
use super::models::{
    DeleteReportRequest, LookupKey, NewRepairRequest, RepairRequest, RepairStatus, ReportView,
    StatusView, UpdateReportRequest, now_timestamp,
};
use super::status_update::persist_ticket_update;
use super::store::TicketStore;
use super::webhook::line_webhook;
use crate::config::DeskConfig;
use crate::errors::{AuthError, StoreError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: Arc<dyn TicketStore>,
    /// Present when a LINE channel access token is configured.
    pub line: Option<LineClient>,
    pub config: Arc<DeskConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn TicketStore>, config: DeskConfig) -> Self {
        Self {
            store,
            line: LineClient::from_config(&config.line),
            config: Arc::new(config),
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"ok": false, "error": message}))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Datastore error");
        ApiError::Internal(err.to_string())
    }
}

/// Unwrap a JSON body, reporting malformed input as a 400 in the API's error shape.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/whoami", get(whoami))
        .route("/api/submit", post(submit_request))
        .route("/api/status/{job_id}", get(ticket_status))
        .route(
            "/api/reports",
            get(list_reports).post(update_report).delete(delete_report),
        )
        .route("/api/export", get(export_reports))
        .route("/api/admin/login", post(admin_login))
        .route("/api/admin/logout", post(admin_logout))
        .route("/api/admin/session", get(admin_session))
        .route("/api/line/interactions", post(line_webhook))
        .route("/api/Line/interactions", post(line_webhook))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Headers consulted for the caller's address, in priority order.
const CLIENT_IP_HEADERS: [&str; 7] = [
    "x-internal-ip",
    "x-remote-ip",
    "x-real-ip",
    "x-forwarded-for",
    "x-cluster-client-ip",
    "cf-connecting-ip",
    "true-client-ip",
];

/// Best-effort client address from proxy headers; `unknown` when absent.
pub fn client_ip(headers: &HeaderMap) -> String {
    let ip = CLIENT_IP_HEADERS
        .iter()
        .find_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .unwrap_or("unknown");

    match ip.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("::ffff:") => ip[7..].to_string(),
        _ => ip.to_string(),
    }
}

#[derive(Debug, Default)]
struct NewTicketNotice {
    push_sent: bool,
    notify_sent: bool,
}

/// Announce a new ticket over LINE push, falling back to LINE Notify.
async fn notify_new_ticket(state: &AppState, ticket: &RepairRequest) -> NewTicketNotice {
    let mut notice = NewTicketNotice::default();
    let Some(line) = state.line.as_ref() else {
        tracing::warn!(job_id = %ticket.job_id, "LINE not configured, new ticket not announced");
        return notice;
    };

    match line.admin_user_id() {
        Some(to) => {
            let message = new_ticket_flex(ticket, &state.config.app_url);
            match line.push_messages(to, vec![message]).await {
                Ok(()) => notice.push_sent = true,
                Err(e) => tracing::warn!(job_id = %ticket.job_id, error = %e, "LINE push failed"),
            }
        }
        None => tracing::warn!("LINE_USER_ID not set, skipping push"),
    }

    if !notice.push_sent && line.has_notify() {
        match line.notify(&ticket_summary(ticket)).await {
            Ok(()) => notice.notify_sent = true,
            Err(e) => tracing::warn!(job_id = %ticket.job_id, error = %e, "LINE Notify failed"),
        }
    }
    notice
}

/// Push a text note to the admin recipient when a ticket reaches a terminal status.
async fn notify_resolution(state: &AppState, ticket: &RepairRequest, reason: Option<&str>) -> bool {
    let (Some(line), true) = (state.line.as_ref(), ticket.status.is_terminal()) else {
        return false;
    };
    let Some(to) = line.admin_user_id() else {
        return false;
    };

    let text = match (ticket.status, reason) {
        (RepairStatus::Rejected, Some(reason)) => {
            format!("Job {} rejected: {}", ticket.job_id, reason)
        }
        (status, _) => format!("Job {} is now {}", ticket.job_id, status),
    };
    match line.push_text(to, &text).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(job_id = %ticket.job_id, error = %e, "LINE status notification failed");
            false
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn whoami(headers: HeaderMap) -> impl IntoResponse {
    Json(json!({ "ip": client_ip(&headers) }))
}

async fn submit_request(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<NewRepairRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = json_body(payload)?;
    req.validate()
        .map_err(|msg| ApiError::BadRequest(msg.to_string()))?;

    let ticket = req.into_ticket(Some(client_ip(&headers)));
    let saved = state.store.insert(ticket).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to save repair request");
        ApiError::Internal(format!("Database error: {}", e))
    })?;
    tracing::info!(job_id = %saved.job_id, backend = state.store.backend(), "Repair request saved");

    let notice = notify_new_ticket(&state, &saved).await;
    Ok(Json(json!({
        "ok": true,
        "jobId": saved.job_id,
        "dbSaved": true,
        "pushSent": notice.push_sent,
        "notifySent": notice.notify_sent,
    })))
}

async fn ticket_status(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = state
        .store
        .find(LookupKey::JobId, job_id.trim())
        .await?
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))?;
    Ok(Json(StatusView::from(&ticket)))
}

async fn list_reports(
    _admin: AdminSession,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let tickets = state.store.list().await?;
    let views: Vec<ReportView> = tickets.iter().map(ReportView::from).collect();
    tracing::debug!(count = views.len(), "Listing reports");
    Ok((
        [(header::CACHE_CONTROL, "no-store, max-age=0")],
        Json(views),
    ))
}

async fn update_report(
    admin: AdminSession,
    State(state): State<SharedState>,
    payload: Result<Json<UpdateReportRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = json_body(payload)?;
    let job_id = req.job_id.trim().to_string();
    if job_id.is_empty() {
        return Err(ApiError::BadRequest("jobId required".to_string()));
    }

    let now = now_timestamp();
    let (patch, new_status) = req.to_patch(&now).map_err(ApiError::BadRequest)?;

    let outcome = persist_ticket_update(state.store.as_ref(), &job_id, &patch).await?;
    let Some(updated) = outcome.first().cloned() else {
        return Err(ApiError::NotFound("Job not found".to_string()));
    };
    tracing::info!(
        %job_id,
        admin = %admin.username,
        status = %updated.status,
        key = outcome.key.column(),
        attempts = outcome.attempts,
        "Report updated"
    );

    let notification_sent = match new_status {
        Some(_) => notify_resolution(&state, &updated, req.reason.as_deref()).await,
        None => false,
    };

    Ok(Json(json!({
        "ok": true,
        "updated": outcome.rows,
        "status": updated.status,
        "jobId": job_id,
        "completedAt": now,
        "notificationSent": notification_sent,
        "droppedColumns": outcome.dropped_columns,
    })))
}

/// Delete by `id`, falling back to `job_id`.
///
/// An `id` failure (a hosted table with a numeric key given a job id) still
/// tries `job_id`; the first error is returned only when both attempts fail.
async fn delete_ticket(store: &dyn TicketStore, key: &str) -> Result<bool, StoreError> {
    match store.delete(LookupKey::Id, key).await {
        Ok(true) => Ok(true),
        Ok(false) => match store.delete(LookupKey::JobId, key).await {
            Ok(deleted) => Ok(deleted),
            Err(e) => {
                tracing::warn!(%key, error = %e, "Delete by job_id failed after id matched nothing");
                Ok(false)
            }
        },
        Err(first) => {
            tracing::warn!(%key, error = %first, "Delete by id failed, retrying by job_id");
            store.delete(LookupKey::JobId, key).await.or(Err(first))
        }
    }
}

async fn delete_report(
    admin: AdminSession,
    State(state): State<SharedState>,
    payload: Result<Json<DeleteReportRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = json_body(payload)
        .map_err(|_| ApiError::BadRequest("Invalid JSON in request body".to_string()))?;
    let key = [req.id.as_deref(), req.job_id.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("jobId or id required".to_string()))?
        .to_string();

    if !delete_ticket(state.store.as_ref(), &key).await? {
        return Err(ApiError::NotFound("Record not found".to_string()));
    }
    tracing::info!(%key, admin = %admin.username, "Report deleted");
    Ok(Json(json!({ "ok": true, "message": "Record deleted" })))
}

async fn admin_login(
    State(state): State<SharedState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = json_body(payload)?;
    let admin = &state.config.admin;
    match login(admin, &req.username, &req.password) {
        Ok(token) => {
            tracing::info!(username = %req.username.trim(), "Admin logged in");
            Ok((
                [(header::SET_COOKIE, session_cookie(&token, admin.secure_cookie))],
                Json(json!({ "ok": true })),
            )
                .into_response())
        }
        Err(AuthError::NotConfigured) => {
            tracing::error!("Admin login attempted but credentials are not configured");
            Err(ApiError::Internal("Server not configured".to_string()))
        }
        Err(e) => {
            tracing::info!(username = %req.username.trim(), reason = %e, "Admin login rejected");
            Ok((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "ok": false, "error": "Invalid credentials" })),
            )
                .into_response())
        }
    }
}

async fn admin_logout() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, cleared_session_cookie())],
        Json(json!({ "ok": true })),
    )
}

async fn admin_session(admin: AdminSession) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "username": admin.username,
        "maxAgeSeconds": SESSION_MAX_AGE_SECS,
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────
