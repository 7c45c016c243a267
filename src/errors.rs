//! Typed error hierarchy for the repair desk.
//!
//! Three top-level enums cover the three collaborators of the HTTP layer:
//! - `AuthError`: admin session token and login failures
//! - `StoreError`: ticket datastore failures (SQLite or PostgREST)
//! - `LineError`: LINE Messaging API failures

use thiserror::Error;

/// Reasons an admin session or login attempt is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Session cookie missing")]
    MissingToken,

    #[error("Admin credentials are not configured")]
    NotConfigured,

    #[error("Session token is malformed")]
    Malformed,

    #[error("Session token names an unknown user")]
    UnknownUser,

    #[error("Session token signature is invalid")]
    BadSignature,

    #[error("Invalid credentials")]
    InvalidCredentials,
}

/// Errors from a ticket datastore backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The datastore refused the statement. `message` is its error text verbatim.
    #[error("{message}")]
    Rejected {
        message: String,
        code: Option<String>,
    },

    #[error("Invalid column name '{0}'")]
    InvalidColumn(String),

    #[error("Update payload has no columns left to write")]
    EmptyPatch,

    #[error("Update gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: usize, last: String },

    #[error("Datastore request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            code: None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(inner, _) => Some(format!("{:?}", inner.code)),
            _ => None,
        };
        Self::Rejected {
            message: err.to_string(),
            code,
        }
    }
}

/// Errors from the LINE Messaging API client.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("LINE channel is not configured")]
    NotConfigured,

    #[error("LINE channel secret cannot key an HMAC")]
    InvalidSecret,

    #[error("LINE API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("LINE request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_rejected_displays_datastore_text() {
        let err = StoreError::rejected("no such column: receipt_no");
        assert_eq!(err.to_string(), "no such column: receipt_no");
    }

    #[test]
    fn store_error_from_rusqlite_keeps_message() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = conn
            .execute("UPDATE missing_table SET a = 1", [])
            .unwrap_err();
        let store_err: StoreError = err.into();
        match &store_err {
            StoreError::Rejected { message, code } => {
                assert!(message.contains("no such table"));
                assert!(code.is_some());
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn retries_exhausted_carries_attempts() {
        let err = StoreError::RetriesExhausted {
            attempts: 5,
            last: "boom".into(),
        };
        assert!(err.to_string().contains('5'));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn line_api_error_carries_status() {
        let err = LineError::Api {
            status: 400,
            body: "bad request".into(),
        };
        assert_eq!(err.to_string(), "LINE API returned 400: bad request");
    }

    #[test]
    fn auth_errors_are_distinct() {
        assert_ne!(AuthError::Malformed, AuthError::BadSignature);
        assert!(matches!(AuthError::MissingToken, AuthError::MissingToken));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&AuthError::NotConfigured);
        assert_std_error(&StoreError::EmptyPatch);
        assert_std_error(&LineError::NotConfigured);
    }
}
