//! Error types for the Hearth engine.

use crate::DocumentId;
use thiserror::Error;

/// All possible errors from the Hearth engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Caller errors
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("document not found: {0}")]
    NotFound(DocumentId),

    #[error("document already exists: {0}")]
    Conflict(DocumentId),

    // Storage errors
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // Transport errors
    #[error("network error: {0}")]
    Network(String),

    #[error("unauthorized by sync server")]
    Unauthorized,

    #[error("request timed out after {0}s")]
    Timeout(u64),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                Error::StorageUnavailable(err.to_string())
            }
            other => Error::Storage(other.to_string()),
        }
    }
}

impl Error {
    /// Whether the error came from the sync transport rather than local storage.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Unauthorized | Error::Timeout(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
