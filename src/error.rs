//! Report error types

use thiserror::Error;

/// Failures that abort a report request.
///
/// Payloads are plain strings so one in-flight computation's error can be
/// handed to every waiter that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("cycle not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ReportError>;

impl ReportError {
    /// Prefixes a fetch failure with the lookup that produced it.
    pub fn context(self, what: &str) -> Self {
        match self {
            ReportError::Fetch(msg) => ReportError::Fetch(format!("{what}: {msg}")),
            other => other,
        }
    }
}

impl From<sqlx::Error> for ReportError {
    fn from(err: sqlx::Error) -> Self {
        ReportError::Fetch(err.to_string())
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        ReportError::Fetch(format!("snapshot decode: {err}"))
    }
}
