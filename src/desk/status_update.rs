//! Drift-tolerant ticket update.
//!
//! The live table may lag behind the columns this service writes (for example
//! a hosted table created before `receipt_no` existed). When the datastore
//! rejects a write because of an unknown column, that column is dropped from
//! the patch and the write is retried, up to [`MAX_UPDATE_ATTEMPTS`] times.
//!
//! There is no locking or version check: each write is last-write-wins on a
//! single row.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::models::{LookupKey, RepairRequest, TicketPatch};
use super::store::TicketStore;
use crate::errors::StoreError;

/// Upper bound on writes issued for one keyed update.
pub const MAX_UPDATE_ATTEMPTS: usize = 5;

// PostgREST: Could not find the 'receipt_no' column of 'repair_requests' in the schema cache
static POSTGREST_MISSING_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Could not find the '([^']+)' column").unwrap());

// SQLite: no such column: receipt_no
static SQLITE_MISSING_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"no such column: ([A-Za-z0-9_.]+)").unwrap());

// PostgreSQL: column "receipt_no" of relation "repair_requests" does not exist
static POSTGRES_MISSING_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"column "([^"]+)"(?: of relation "[^"]+")? does not exist"#).unwrap());

/// Extract the column name from an unknown-column error message.
pub fn missing_column(message: &str) -> Option<String> {
    [
        &*POSTGREST_MISSING_COLUMN,
        &*SQLITE_MISSING_COLUMN,
        &*POSTGRES_MISSING_COLUMN,
    ]
    .iter()
    .find_map(|re| re.captures(message))
    .and_then(|cap| cap.get(1))
    .map(|m| {
        // SQLite may qualify the name as `table.column`.
        let name = m.as_str();
        name.rsplit('.').next().unwrap_or(name).to_string()
    })
}

/// Result of a persisted update.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    /// Rows as written. Empty when the key matched nothing.
    pub rows: Vec<RepairRequest>,
    pub key: LookupKey,
    pub attempts: usize,
    /// Columns removed from the patch because the table lacks them.
    pub dropped_columns: Vec<String>,
}

impl UpdateOutcome {
    pub fn first(&self) -> Option<&RepairRequest> {
        self.rows.first()
    }
}

/// Write `patch` to rows where `key = value`, dropping unknown columns and retrying.
pub async fn update_tolerating_drift(
    store: &dyn TicketStore,
    key: LookupKey,
    value: &str,
    patch: &TicketPatch,
) -> Result<UpdateOutcome, StoreError> {
    if patch.is_empty() {
        return Err(StoreError::EmptyPatch);
    }

    let mut patch = patch.clone();
    let mut dropped_columns = Vec::new();
    let mut last_error = String::new();

    for attempt in 1..=MAX_UPDATE_ATTEMPTS {
        let err = match store.update(key, value, &patch).await {
            Ok(rows) => {
                return Ok(UpdateOutcome {
                    rows,
                    key,
                    attempts: attempt,
                    dropped_columns,
                });
            }
            Err(err) => err,
        };

        let StoreError::Rejected { message, .. } = &err else {
            return Err(err);
        };
        let Some(column) = missing_column(message) else {
            return Err(err);
        };
        if !patch.remove(&column) {
            return Err(err);
        }

        tracing::warn!(
            backend = store.backend(),
            key = key.column(),
            %column,
            attempt,
            "Datastore lacks column, dropping it from the update"
        );
        last_error = message.clone();
        dropped_columns.push(column);

        if patch.is_empty() {
            return Err(StoreError::EmptyPatch);
        }
    }

    Err(StoreError::RetriesExhausted {
        attempts: MAX_UPDATE_ATTEMPTS,
        last: last_error,
    })
}

/// Persist a ticket update addressed by `ticket_ref`.
///
/// Tries `job_id` first; when that fails or matches no row, repeats the
/// protocol keyed by `id`. An outcome with no rows means neither key matched.
pub async fn persist_ticket_update(
    store: &dyn TicketStore,
    ticket_ref: &str,
    patch: &TicketPatch,
) -> Result<UpdateOutcome, StoreError> {
    match update_tolerating_drift(store, LookupKey::JobId, ticket_ref, patch).await {
        Ok(outcome) if !outcome.rows.is_empty() => Ok(outcome),
        Ok(outcome) => {
            tracing::debug!(ticket_ref, "No row matched job_id, retrying by id");
            match update_tolerating_drift(store, LookupKey::Id, ticket_ref, patch).await {
                Ok(by_id) => Ok(by_id),
                Err(err) => {
                    tracing::warn!(ticket_ref, error = %err, "Update by id failed");
                    Ok(outcome)
                }
            }
        }
        Err(job_id_err) => {
            tracing::warn!(ticket_ref, error = %job_id_err, "Update by job_id failed, retrying by id");
            match update_tolerating_drift(store, LookupKey::Id, ticket_ref, patch).await {
                Ok(by_id) => Ok(by_id),
                Err(err) => {
                    tracing::warn!(ticket_ref, error = %err, "Update by id failed");
                    Err(job_id_err)
                }
            }
        }
    }
}
