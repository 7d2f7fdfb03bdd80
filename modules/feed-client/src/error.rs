use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeedError>;

/// Classified outcomes of a remote feed call.
///
/// Rate limiting is routine and carries the wait the server asked for;
/// access and reference errors are terminal for their unit of work; only
/// `Network`/`Api`/`Parse` escalate to the task-level retry policy.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}
