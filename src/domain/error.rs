//! Error taxonomy for ingestion, twin store access and startup

use thiserror::Error;

/// Malformed event; the event is dropped and never retried here
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("event has no payload body")]
    MissingBody,

    #[error("payload body is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure talking to the twin store for one entity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TwinError {
    #[error("twin {0} not found")]
    NotFound(String),

    #[error("twin store unavailable: {0}")]
    Unavailable(String),

    #[error("patch conflict on twin {0}")]
    Conflict(String),

    #[error("twin store call timed out after {0} ms")]
    Timeout(u64),
}

impl TwinError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TwinError::NotFound(_) => "not_found",
            TwinError::Unavailable(_) => "unavailable",
            TwinError::Conflict(_) => "conflict",
            TwinError::Timeout(_) => "timeout",
        }
    }
}

/// Fatal startup condition; the process must not serve events
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("twin store endpoint not configured (set [twin_store].endpoint or TWIN_STORE_URL)")]
    MissingEndpoint,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
