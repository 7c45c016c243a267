//! LINE Messaging API client, webhook payload types and message builders.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::Sha256;

use super::models::{RepairRequest, RepairStatus};
use crate::config::LineConfig;
use crate::errors::LineError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook body signature.
pub const SIGNATURE_HEADER: &str = "x-line-signature";

/// Longest free-text field placed in a notification, in characters.
const MAX_FIELD_CHARS: usize = 300;

// ── Signatures ────────────────────────────────────────────────────────

/// `base64(HMAC-SHA256(channel_secret, body))`.
pub fn sign_body(channel_secret: &str, body: &[u8]) -> Result<String, LineError> {
    let mut mac = HmacSha256::new_from_slice(channel_secret.as_bytes())
        .map_err(|_| LineError::InvalidSecret)?;
    mac.update(body);
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Check a webhook signature in constant time.
pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = BASE64.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

// ── Webhook payload ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<EventSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postback: Option<PostbackContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostbackContent {
    #[serde(default)]
    pub data: String,
}

impl WebhookEvent {
    /// A user postback event, shaped like the ones LINE delivers.
    pub fn postback(data: &str, user_id: &str, reply_token: &str) -> Self {
        Self {
            kind: "postback".to_string(),
            reply_token: Some(reply_token.to_string()),
            source: Some(EventSource {
                kind: Some("user".to_string()),
                user_id: Some(user_id.to_string()),
            }),
            postback: Some(PostbackContent {
                data: data.to_string(),
            }),
            webhook_event_id: Some(uuid::Uuid::new_v4().simple().to_string()),
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
            mode: Some("active".to_string()),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.user_id.as_deref())
    }

    pub fn postback_data(&self) -> Option<&str> {
        if self.kind != "postback" {
            return None;
        }
        self.postback.as_ref().map(|p| p.data.as_str())
    }
}

// ── Postback actions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostbackAction {
    Approve,
    Reject,
}

impl PostbackAction {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Approve => "approve_job:",
            Self::Reject => "reject_job:",
        }
    }

    /// Parse `approve_job:<id>` / `reject_job:<id>` into an action and a trimmed job id.
    pub fn parse(data: &str) -> Option<(Self, String)> {
        [Self::Approve, Self::Reject].into_iter().find_map(|action| {
            data.strip_prefix(action.prefix())
                .map(str::trim)
                .filter(|job_id| !job_id.is_empty())
                .map(|job_id| (action, job_id.to_string()))
        })
    }

    /// Status a ticket moves to when this action is applied.
    pub fn target_status(&self) -> RepairStatus {
        match self {
            Self::Approve => RepairStatus::InProgress,
            Self::Reject => RepairStatus::Rejected,
        }
    }

    pub fn postback_data(&self, job_id: &str) -> String {
        format!("{}{}", self.prefix(), job_id)
    }
}

// ── Client ────────────────────────────────────────────────────────────

/// Thin client over the LINE reply/push endpoints and LINE Notify.
#[derive(Clone)]
pub struct LineClient {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
    notify_url: String,
    notify_token: Option<String>,
    admin_user_id: Option<String>,
}

impl LineClient {
    /// Build a client when a channel access token is configured.
    pub fn from_config(config: &LineConfig) -> Option<Self> {
        let access_token = config.channel_access_token.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            access_token,
            notify_url: config.notify_url.clone(),
            notify_token: config.notify_token.clone(),
            admin_user_id: config.admin_user_id.clone(),
        })
    }

    /// Recipient of ticket notifications, if configured.
    pub fn admin_user_id(&self) -> Option<&str> {
        self.admin_user_id.as_deref()
    }

    pub fn has_notify(&self) -> bool {
        self.notify_token.is_some()
    }

    pub async fn reply_text(&self, reply_token: &str, text: &str) -> Result<(), LineError> {
        let body = json!({
            "replyToken": reply_token,
            "messages": [text_message(text)],
        });
        self.post_json("/v2/bot/message/reply", &body).await
    }

    pub async fn push_text(&self, to: &str, text: &str) -> Result<(), LineError> {
        self.push_messages(to, vec![text_message(text)]).await
    }

    pub async fn push_messages(&self, to: &str, messages: Vec<Value>) -> Result<(), LineError> {
        let body = json!({ "to": to, "messages": messages });
        self.post_json("/v2/bot/message/push", &body).await
    }

    /// Send a plain-text LINE Notify message.
    pub async fn notify(&self, message: &str) -> Result<(), LineError> {
        let token = self.notify_token.as_deref().ok_or(LineError::NotConfigured)?;
        let resp = self
            .client
            .post(&self.notify_url)
            .bearer_auth(token)
            .form(&[("message", message)])
            .send()
            .await?;
        check(resp).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<(), LineError> {
        let resp = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        check(resp).await
    }
}

async fn check(resp: reqwest::Response) -> Result<(), LineError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(LineError::Api {
        status: status.as_u16(),
        body,
    })
}

// ── Message builders ──────────────────────────────────────────────────

pub fn text_message(text: &str) -> Value {
    json!({ "type": "text", "text": text })
}

/// Cap free text at 300 characters, ending in `...` when cut.
pub fn truncate_text(text: &str) -> String {
    if text.chars().count() <= MAX_FIELD_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_FIELD_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

fn or_dash(value: Option<&str>) -> &str {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => "-",
    }
}

/// Public status page link for a ticket.
pub fn status_url(app_url: &str, job_id: &str) -> String {
    let base = format!("{}/status", app_url.trim_end_matches('/'));
    match reqwest::Url::parse(&base) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("jobId", job_id);
            url.to_string()
        }
        Err(_) => format!("{}?jobId={}", base, job_id),
    }
}

fn info_row(label: &str, value: &str) -> Value {
    json!({
        "type": "box",
        "layout": "horizontal",
        "spacing": "sm",
        "contents": [
            { "type": "text", "text": label, "color": "#475569", "size": "xs", "weight": "bold", "flex": 2 },
            { "type": "text", "text": value, "color": "#1e293b", "size": "sm", "wrap": true, "flex": 3, "align": "end" }
        ]
    })
}

/// Flex message announcing a new ticket, with accept/reject postback buttons.
pub fn new_ticket_flex(ticket: &RepairRequest, app_url: &str) -> Value {
    let location = format!(
        "{} floor {}",
        or_dash(ticket.dept_building.as_deref()),
        or_dash(ticket.dept_floor.as_deref())
    );
    let issue = truncate_text(or_dash(Some(&ticket.issue)));
    let notes = match ticket.notes.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => truncate_text(n),
        _ => "(none)".to_string(),
    };

    let bubble = json!({
        "type": "bubble",
        "body": {
            "type": "box",
            "layout": "vertical",
            "paddingAll": "0px",
            "contents": [
                {
                    "type": "box", "layout": "vertical", "backgroundColor": "#7c3aed", "paddingAll": "14px",
                    "contents": [
                        { "type": "text", "text": "New repair request", "weight": "bold", "color": "#ffffff", "size": "sm" }
                    ]
                },
                {
                    "type": "box", "layout": "vertical", "paddingAll": "14px", "spacing": "sm",
                    "contents": [
                        { "type": "text", "text": "Job ID", "weight": "bold", "color": "#7c3aed", "size": "sm" },
                        { "type": "text", "text": ticket.job_id, "color": "#333333", "size": "md", "wrap": true }
                    ]
                },
                { "type": "separator", "color": "#f3f4f6" },
                {
                    "type": "box", "layout": "vertical", "paddingAll": "14px", "spacing": "lg",
                    "contents": [
                        info_row("Reporter", or_dash(Some(&ticket.full_name))),
                        info_row("Department", or_dash(ticket.dept_name.as_deref())),
                        info_row("Location", &location),
                        info_row("Device", or_dash(Some(&ticket.device))),
                        info_row("Device ID", or_dash(Some(&ticket.device_id))),
                        info_row("Phone", or_dash(ticket.phone.as_deref())),
                    ]
                },
                {
                    "type": "box", "layout": "vertical", "backgroundColor": "#fef3c7", "paddingAll": "14px",
                    "contents": [
                        { "type": "text", "text": "Issue", "weight": "bold", "color": "#b45309", "size": "sm" },
                        { "type": "text", "text": issue, "color": "#78350f", "size": "sm", "wrap": true, "margin": "md" }
                    ]
                },
                {
                    "type": "box", "layout": "vertical", "backgroundColor": "#dbeafe", "paddingAll": "14px",
                    "contents": [
                        { "type": "text", "text": "Notes", "weight": "bold", "color": "#0c4a6e", "size": "sm" },
                        { "type": "text", "text": notes, "color": "#164e63", "size": "sm", "wrap": true, "margin": "md" }
                    ]
                }
            ]
        },
        "footer": {
            "type": "box",
            "layout": "vertical",
            "spacing": "sm",
            "backgroundColor": "#f1f5f9",
            "paddingAll": "12px",
            "contents": [
                {
                    "type": "button", "style": "primary", "color": "#16a34a",
                    "action": { "type": "postback", "label": "Accept", "data": PostbackAction::Approve.postback_data(&ticket.job_id) }
                },
                {
                    "type": "button", "style": "secondary", "color": "#dc2626",
                    "action": { "type": "postback", "label": "Reject", "data": PostbackAction::Reject.postback_data(&ticket.job_id) }
                },
                {
                    "type": "button", "style": "link", "color": "#0369a1",
                    "action": { "type": "uri", "label": "Check status", "uri": status_url(app_url, &ticket.job_id) }
                }
            ]
        }
    });

    json!({
        "type": "flex",
        "altText": format!("Repair request {}", ticket.job_id),
        "contents": bubble,
    })
}

/// Plain-text summary of a new ticket, for LINE Notify.
pub fn ticket_summary(ticket: &RepairRequest) -> String {
    format!(
        "New repair request\n\nReporter: {}\nDepartment: {} ({} floor {})\nDevice: {} ({})\nPhone: {}\nIssue: {}\nNotes: {}\nJob ID: {}",
        or_dash(Some(&ticket.full_name)),
        or_dash(ticket.dept_name.as_deref()),
        or_dash(ticket.dept_building.as_deref()),
        or_dash(ticket.dept_floor.as_deref()),
        or_dash(Some(&ticket.device)),
        or_dash(Some(&ticket.device_id)),
        or_dash(ticket.phone.as_deref()),
        truncate_text(or_dash(Some(&ticket.issue))),
        truncate_text(or_dash(ticket.notes.as_deref())),
        ticket.job_id,
    )
}
