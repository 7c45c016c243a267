//! Report export as CSV or JSON.

use std::str::FromStr;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::DateTime;
use serde::Deserialize;

use super::api::{ApiError, SharedState};
use super::auth::AdminSession;
use super::models::{RepairRequest, RepairStatus};

/// Column headings of the CSV export, in row order.
pub const CSV_HEADERS: [&str; 17] = [
    "Job ID",
    "ID",
    "Name",
    "Phone",
    "Department",
    "Building",
    "Floor",
    "Device",
    "Device ID",
    "Issue",
    "Notes",
    "Status",
    "Receipt No",
    "Reject Reason",
    "Created",
    "Updated",
    "Handler",
];

const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err("Invalid format".to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
    pub status: Option<String>,
}

/// `None` selects every status. Accepts `all` or nothing for that.
pub fn parse_status_filter(value: Option<&str>) -> Result<Option<RepairStatus>, String> {
    match value.map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(s) => RepairStatus::from_str(s).map(Some),
    }
}

pub fn filter_by_status(
    tickets: Vec<RepairRequest>,
    status: Option<RepairStatus>,
) -> Vec<RepairRequest> {
    match status {
        Some(status) => tickets.into_iter().filter(|t| t.status == status).collect(),
        None => tickets,
    }
}

/// `YYYY-MM-DD HH:MM` in UTC; unparseable input passes through.
fn display_timestamp(value: &str) -> String {
    match DateTime::parse_from_rfc3339(value) {
        Ok(ts) => ts.naive_utc().format("%Y-%m-%d %H:%M").to_string(),
        Err(_) => value.to_string(),
    }
}

fn csv_row(t: &RepairRequest) -> Vec<String> {
    let text = |v: Option<&str>| v.unwrap_or_default().to_string();
    let handler = t
        .handler_tag
        .as_deref()
        .filter(|v| !v.is_empty())
        .or(t.handler_id.as_deref());
    vec![
        t.job_id.clone(),
        t.id.clone(),
        t.full_name.clone(),
        text(t.phone.as_deref()),
        text(t.dept_name.as_deref()),
        text(t.dept_building.as_deref()),
        text(t.dept_floor.as_deref()),
        t.device.clone(),
        t.device_id.clone(),
        t.issue.clone(),
        text(t.notes.as_deref()),
        t.status.to_string(),
        text(t.receipt_no.as_deref()),
        text(t.reject_reason.as_deref()),
        display_timestamp(&t.created_at),
        display_timestamp(&t.updated_at),
        text(handler),
    ]
}

/// CRLF records, fields quoted only when they need it.
fn csv_writer<W: std::io::Write>(out: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::CRLF)
        .from_writer(out)
}

/// Render tickets as a UTF-8 CSV document with a BOM and CRLF line endings.
pub fn render_csv(tickets: &[RepairRequest]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv_writer(UTF8_BOM.as_bytes().to_vec());
    writer.write_record(CSV_HEADERS)?;
    for ticket in tickets {
        writer.write_record(csv_row(ticket))?;
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}

pub fn export_filename(now_millis: i64) -> String {
    format!("repair_reports_{}.csv", now_millis)
}

/// `GET /api/export?format=csv|json&status=...`
pub async fn export_reports(
    _admin: AdminSession,
    State(state): State<SharedState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format = match query.format.as_deref().map(str::trim) {
        None | Some("") => ExportFormat::Csv,
        Some(f) => ExportFormat::from_str(f).map_err(ApiError::BadRequest)?,
    };
    let status = parse_status_filter(query.status.as_deref()).map_err(ApiError::BadRequest)?;

    let tickets = filter_by_status(state.store.list().await?, status);
    tracing::info!(count = tickets.len(), ?format, "Exporting reports");

    match format {
        ExportFormat::Json => Ok(Json(tickets).into_response()),
        ExportFormat::Csv => {
            let body = render_csv(&tickets).map_err(|e| {
                tracing::error!(error = %e, "CSV export failed");
                ApiError::Internal(format!("CSV export failed: {}", e))
            })?;
            let disposition = format!(
                "attachment; filename=\"{}\"",
                export_filename(chrono::Utc::now().timestamp_millis())
            );
            Ok((
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                body,
            )
                .into_response())
        }
    }
}
