//! Engine-wide error taxonomy: a single `thiserror` enum with
//! `miette::Diagnostic` metadata, mapped to HTTP status codes only at the
//! REST boundary (see `api::error`).

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("not found: {what}")]
    #[diagnostic(code(waygate::not_found))]
    NotFound { what: String },

    #[error("invalid state: {reason}")]
    #[diagnostic(
        code(waygate::invalid_state),
        help("Check the current exchange/approval status before retrying this transition.")
    )]
    InvalidState { reason: String },

    #[error("bad input: {reason}")]
    #[diagnostic(code(waygate::bad_input))]
    BadInput { reason: String },

    #[error("store error: {message}")]
    #[diagnostic(
        code(waygate::store),
        help("Transient store errors are retried internally; this means retries were exhausted.")
    )]
    Store { message: String },

    #[error("approval rejected: {reason}")]
    #[diagnostic(code(waygate::approval_rejected))]
    ApprovalRejected { reason: String },

    #[error("approval timed out")]
    #[diagnostic(code(waygate::approval_timeout))]
    ApprovalTimeout,

    #[error("external collaborator error: {message}")]
    #[diagnostic(code(waygate::external))]
    External { message: String },
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Store {
            message: e.to_string(),
        }
    }
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound { what: what.into() }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        EngineError::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn bad_input(reason: impl Into<String>) -> Self {
        EngineError::BadInput {
            reason: reason.into(),
        }
    }
}

/// True for `sqlx` errors that represent SQLite's transient "database is
/// locked/busy" condition, which the checkpoint insert path must retry.
pub fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code();
            matches!(code.as_deref(), Some("5") | Some("6"))
                || db_err.message().to_lowercase().contains("busy")
                || db_err.message().to_lowercase().contains("locked")
        }
        _ => false,
    }
}
