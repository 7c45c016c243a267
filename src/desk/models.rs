use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Current time as an RFC 3339 UTC timestamp with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Status ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RepairStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Rejected,
}

impl RepairStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    /// Whether a ticket in this status may move to `next`.
    ///
    /// pending → in-progress | rejected, in-progress → completed | rejected.
    pub fn can_transition_to(&self, next: RepairStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Rejected)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }

    /// Read a status column. Empty or unrecognised values count as `Pending`
    /// so one odd row never fails a whole listing.
    pub fn from_stored(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::Pending,
            Some(s) => s.parse().unwrap_or_else(|_| {
                tracing::warn!(status = s, "Unrecognised ticket status, treating as pending");
                Self::Pending
            }),
        }
    }
}

impl fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepairStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

// ── Ticket ────────────────────────────────────────────────────────────

/// A row of the `repair_requests` table.
///
/// Rows from an older or hand-edited table still deserialize: missing or
/// `null` columns take their defaults, numeric ids become text, and an
/// unrecognised status reads as `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepairRequest {
    #[serde(default, deserialize_with = "id_text")]
    pub id: String,
    #[serde(default, deserialize_with = "id_text")]
    pub job_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub full_name: String,
    #[serde(default)]
    pub dept_name: Option<String>,
    #[serde(default)]
    pub dept_building: Option<String>,
    #[serde(default)]
    pub dept_floor: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub device: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub device_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub issue: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub request_ip: Option<String>,
    #[serde(default, deserialize_with = "stored_status")]
    pub status: RepairStatus,
    #[serde(default)]
    pub receipt_no: Option<String>,
    #[serde(default)]
    pub reject_reason: Option<String>,
    #[serde(default)]
    pub handler_id: Option<String>,
    #[serde(default)]
    pub handler_tag: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub updated_at: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Hosted tables may use bigint primary keys.
fn id_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

fn stored_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RepairStatus, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(RepairStatus::from_stored(value.as_deref()))
}

/// Which column identifies the ticket in a lookup or write.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LookupKey {
    JobId,
    Id,
}

impl LookupKey {
    pub fn column(&self) -> &'static str {
        match self {
            Self::JobId => "job_id",
            Self::Id => "id",
        }
    }
}

// ── Patch ─────────────────────────────────────────────────────────────

/// Column names written by the service.
pub mod columns {
    pub const STATUS: &str = "status";
    pub const UPDATED_AT: &str = "updated_at";
    pub const RECEIPT_NO: &str = "receipt_no";
    pub const REJECT_REASON: &str = "reject_reason";
    pub const HANDLER_ID: &str = "handler_id";
    pub const HANDLER_TAG: &str = "handler_tag";
    pub const FULL_NAME: &str = "full_name";
    pub const PHONE: &str = "phone";
    pub const DEVICE: &str = "device";
    pub const NOTES: &str = "notes";
}

/// True for `[a-z_][a-z0-9_]*`, the only column names a patch may carry.
pub fn is_valid_column_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Column → value map describing a partial ticket update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TicketPatch {
    columns: BTreeMap<String, String>,
}

impl TicketPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: &str, value: impl Into<String>) -> Self {
        self.columns.insert(column.to_string(), value.into());
        self
    }

    /// Set `column` only when `value` is present and non-blank.
    pub fn set_if_present(self, column: &str, value: Option<&str>) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Drop a column. Returns whether it was present.
    pub fn remove(&mut self, column: &str) -> bool {
        self.columns.remove(column).is_some()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns.get(column).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ── Request payloads ──────────────────────────────────────────────────

/// Body of `POST /api/submit`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewRepairRequest {
    pub full_name: String,
    pub dept_name: String,
    pub dept_building: String,
    pub dept_floor: String,
    pub device: String,
    pub device_id: String,
    pub issue: String,
    pub phone: String,
    pub notes: String,
}

impl NewRepairRequest {
    /// Check the required fields, returning the first problem found.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.full_name.trim().is_empty() {
            return Err("Name is required");
        }
        if self.device.trim().is_empty() {
            return Err("Device type is required");
        }
        if self.device_id.trim().is_empty() {
            return Err("Device ID is required");
        }
        if self.issue.trim().is_empty() {
            return Err("Issue description is required");
        }
        Ok(())
    }

    /// Build a fresh `pending` ticket with newly generated identifiers.
    pub fn into_ticket(self, request_ip: Option<String>) -> RepairRequest {
        let now = now_timestamp();
        let optional = |s: String| {
            let s = s.trim().to_string();
            if s.is_empty() { None } else { Some(s) }
        };
        RepairRequest {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: uuid::Uuid::new_v4().to_string(),
            full_name: self.full_name.trim().to_string(),
            dept_name: optional(self.dept_name),
            dept_building: optional(self.dept_building),
            dept_floor: optional(self.dept_floor),
            device: self.device.trim().to_string(),
            device_id: self.device_id.trim().to_string(),
            issue: self.issue.trim().to_string(),
            phone: optional(self.phone),
            notes: optional(self.notes),
            request_ip,
            status: RepairStatus::Pending,
            receipt_no: None,
            reject_reason: None,
            handler_id: None,
            handler_tag: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Body of `POST /api/reports`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateReportRequest {
    pub job_id: String,
    pub status: Option<String>,
    pub receipt_no: Option<String>,
    pub reason: Option<String>,
    pub handler_name: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub device: Option<String>,
    pub notes: Option<String>,
}

impl UpdateReportRequest {
    /// Translate the request into a patch stamped with `now`.
    ///
    /// Returns the parsed target status alongside, when one was given.
    pub fn to_patch(&self, now: &str) -> Result<(TicketPatch, Option<RepairStatus>), String> {
        let status = match self.status.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => Some(RepairStatus::from_str(s)?),
            _ => None,
        };

        let mut patch = TicketPatch::new().set(columns::UPDATED_AT, now);
        if let Some(status) = status {
            patch = patch.set(columns::STATUS, status.as_str());
        }
        let patch = patch
            .set_if_present(columns::RECEIPT_NO, self.receipt_no.as_deref())
            .set_if_present(columns::REJECT_REASON, self.reason.as_deref())
            .set_if_present(columns::HANDLER_TAG, self.handler_name.as_deref())
            .set_if_present(columns::FULL_NAME, self.name.as_deref())
            .set_if_present(columns::PHONE, self.phone.as_deref())
            .set_if_present(columns::DEVICE, self.device.as_deref())
            .set_if_present(columns::NOTES, self.notes.as_deref());
        Ok((patch, status))
    }
}

/// Body of `DELETE /api/reports`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteReportRequest {
    pub id: Option<String>,
    pub job_id: Option<String>,
}

// ── Views ─────────────────────────────────────────────────────────────

/// Dashboard listing row. Blank text renders as `-`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportView {
    pub id: String,
    pub job_id: String,
    pub name: String,
    pub phone: String,
    pub device: String,
    pub device_id: String,
    pub issue: String,
    pub status: RepairStatus,
    pub dept_name: String,
    pub dept_building: String,
    pub dept_floor: String,
    pub handler_id: String,
    pub handler_tag: String,
    pub notes: String,
    pub receipt_no: Option<String>,
    pub reject_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn or_dash(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "-".to_string(),
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl From<&RepairRequest> for ReportView {
    fn from(r: &RepairRequest) -> Self {
        let updated_at = if r.updated_at.is_empty() {
            r.created_at.clone()
        } else {
            r.updated_at.clone()
        };
        Self {
            id: r.id.clone(),
            job_id: r.job_id.clone(),
            name: or_dash(Some(&r.full_name)),
            phone: or_dash(r.phone.as_deref()),
            device: or_dash(Some(&r.device)),
            device_id: or_dash(Some(&r.device_id)),
            issue: or_dash(Some(&r.issue)),
            status: r.status,
            dept_name: or_dash(r.dept_name.as_deref()),
            dept_building: or_dash(r.dept_building.as_deref()),
            dept_floor: or_dash(r.dept_floor.as_deref()),
            handler_id: or_dash(r.handler_id.as_deref()),
            handler_tag: or_dash(r.handler_tag.as_deref()),
            notes: or_dash(r.notes.as_deref()),
            receipt_no: non_blank(r.receipt_no.as_deref()),
            reject_reason: non_blank(r.reject_reason.as_deref()),
            created_at: r.created_at.clone(),
            updated_at,
        }
    }
}

/// Public status page view; carries no contact details.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub job_id: String,
    pub status: RepairStatus,
    pub device: String,
    pub device_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub handler_tag: Option<String>,
    pub receipt_no: Option<String>,
    pub reject_reason: Option<String>,
}

impl From<&RepairRequest> for StatusView {
    fn from(r: &RepairRequest) -> Self {
        Self {
            job_id: r.job_id.clone(),
            status: r.status,
            device: r.device.clone(),
            device_id: r.device_id.clone(),
            created_at: r.created_at.clone(),
            updated_at: r.updated_at.clone(),
            handler_tag: non_blank(r.handler_tag.as_deref()),
            receipt_no: non_blank(r.receipt_no.as_deref()),
            reject_reason: non_blank(r.reject_reason.as_deref()),
        }
    }
}
