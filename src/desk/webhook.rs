//! LINE webhook: signature check and postback-driven status changes.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use super::api::SharedState;
use super::line::{LineClient, PostbackAction, SIGNATURE_HEADER, WebhookEvent, WebhookPayload, verify_signature};
use super::models::{LookupKey, RepairRequest, RepairStatus, TicketPatch, columns, now_timestamp};
use super::status_update::persist_ticket_update;
use super::store::TicketStore;

/// What happened when a postback was applied to a ticket.
#[derive(Debug, Clone, PartialEq)]
pub enum PostbackOutcome {
    Applied {
        ticket: RepairRequest,
        dropped_columns: Vec<String>,
    },
    /// The ticket already had the target status; nothing was written.
    AlreadyApplied { status: RepairStatus },
    /// The transition is not allowed from the ticket's current status.
    Skipped { current: RepairStatus },
    NotFound,
    Failed { error: String },
}

impl PostbackOutcome {
    /// Text sent back to the user who pressed the button.
    pub fn reply_text(&self, action: PostbackAction, job_id: &str) -> String {
        match self {
            Self::Applied { .. } => match action {
                PostbackAction::Approve => format!("Job {} accepted", job_id),
                PostbackAction::Reject => format!("Job {} rejected", job_id),
            },
            Self::AlreadyApplied { status } => format!("Job {} is already {}", job_id, status),
            Self::Skipped { current } => {
                let verb = match action {
                    PostbackAction::Approve => "accepted",
                    PostbackAction::Reject => "rejected",
                };
                format!(
                    "Job {} cannot be {}: current status is {}",
                    job_id, verb, current
                )
            }
            Self::NotFound => format!("Job {} not found", job_id),
            Self::Failed { error } => format!("Could not update job {} ({})", job_id, error),
        }
    }
}

/// Move the ticket `job_id` to the status `action` targets, on behalf of `user_id`.
pub async fn apply_postback(
    store: &dyn TicketStore,
    action: PostbackAction,
    job_id: &str,
    user_id: &str,
) -> PostbackOutcome {
    let ticket = match store.find(LookupKey::JobId, job_id).await {
        Ok(Some(ticket)) => ticket,
        Ok(None) => return PostbackOutcome::NotFound,
        Err(e) => {
            tracing::error!(job_id, error = %e, "Ticket lookup failed");
            return PostbackOutcome::Failed {
                error: e.to_string(),
            };
        }
    };

    let target = action.target_status();
    if ticket.status == target {
        return PostbackOutcome::AlreadyApplied { status: target };
    }
    if !ticket.status.can_transition_to(target) {
        tracing::info!(
            job_id,
            current = %ticket.status,
            %target,
            "Postback skipped, transition not allowed"
        );
        return PostbackOutcome::Skipped {
            current: ticket.status,
        };
    }

    let patch = TicketPatch::new()
        .set(columns::STATUS, target.as_str())
        .set(columns::UPDATED_AT, now_timestamp())
        .set_if_present(columns::HANDLER_ID, Some(user_id))
        .set_if_present(columns::HANDLER_TAG, Some(user_id));

    match persist_ticket_update(store, job_id, &patch).await {
        Ok(outcome) => match outcome.rows.into_iter().next() {
            Some(ticket) => PostbackOutcome::Applied {
                ticket,
                dropped_columns: outcome.dropped_columns,
            },
            None => PostbackOutcome::NotFound,
        },
        Err(e) => {
            tracing::error!(job_id, error = %e, "Postback update failed");
            PostbackOutcome::Failed {
                error: e.to_string(),
            }
        }
    }
}

async fn handle_event(state: &SharedState, line: &LineClient, event: &WebhookEvent) {
    let Some(data) = event.postback_data() else {
        tracing::debug!(kind = %event.kind, "Skipping non-postback event");
        return;
    };
    let Some((action, job_id)) = PostbackAction::parse(data) else {
        tracing::debug!(data, "Skipping unrecognised postback data");
        return;
    };
    let user_id = event.user_id().unwrap_or_default();

    let outcome = apply_postback(state.store.as_ref(), action, &job_id, user_id).await;
    tracing::info!(%job_id, ?action, user_id, outcome = ?outcome, "Postback handled");

    if let Some(reply_token) = event.reply_token.as_deref() {
        let text = outcome.reply_text(action, &job_id);
        if let Err(e) = line.reply_text(reply_token, &text).await {
            tracing::warn!(%job_id, error = %e, "LINE reply failed");
        }
    }

    if let (PostbackOutcome::Applied { .. }, Some(admin)) = (&outcome, line.admin_user_id()) {
        let text = match action {
            PostbackAction::Approve => format!("Job {} accepted by {}", job_id, user_id),
            PostbackAction::Reject => format!("Job {} rejected by {}", job_id, user_id),
        };
        if let Err(e) = line.push_text(admin, &text).await {
            tracing::warn!(%job_id, error = %e, "LINE admin notification failed");
        }
    }
}

/// `POST /api/line/interactions`
pub async fn line_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (Some(secret), Some(line)) = (
        state.config.line.channel_secret.as_deref(),
        state.line.as_ref(),
    ) else {
        tracing::error!("LINE webhook called without channel secret or access token");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Missing LINE env").into_response();
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(secret, &body, signature) {
        tracing::warn!("LINE webhook signature mismatch");
        return (StatusCode::UNAUTHORIZED, "Invalid signature").into_response();
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "LINE webhook body is not valid JSON");
            return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
        }
    };

    tracing::info!(events = payload.events.len(), "LINE webhook received");
    for event in &payload.events {
        handle_event(&state, line, event).await;
    }

    (StatusCode::OK, "OK").into_response()
}
