//! Error taxonomy for the memory core.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MemoryCoreError>;

/// The error taxonomy every public operation returns through.
#[derive(Error, Debug)]
pub enum MemoryCoreError {
    /// Caller-supplied data failed validation (bad key, malformed filter, oversized payload).
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// A referenced id does not exist (or is excluded, e.g. superseded).
    #[error("not found: {0}")]
    NotFound(String),

    /// A concurrent or ordering conflict that the caller can retry/resolve.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The vector store / SQLite backend is unavailable or returned a transport error.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// An embedding or LLM provider call failed.
    #[error("provider failure: {0}")]
    ProviderFailure(String),

    /// A custom extraction prompt or other untrusted input was rejected by the
    /// security validator.
    #[error("security rejected: {0}")]
    SecurityRejected(String),

    /// An operation exceeded its deadline.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Anything else: bugs, invariant violations, unexpected states.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MemoryCoreError {
    /// Whether a background task runner should retry an operation that failed
    /// with this error, per the propagation policy in the error handling design.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoryCoreError::StoreUnavailable(_)
                | MemoryCoreError::ProviderFailure(_)
                | MemoryCoreError::DeadlineExceeded(_)
        )
    }
}

impl From<rusqlite::Error> for MemoryCoreError {
    fn from(e: rusqlite::Error) -> Self {
        MemoryCoreError::StoreUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for MemoryCoreError {
    fn from(e: serde_json::Error) -> Self {
        MemoryCoreError::InputInvalid(e.to_string())
    }
}

impl From<std::io::Error> for MemoryCoreError {
    fn from(e: std::io::Error) -> Self {
        MemoryCoreError::StoreUnavailable(e.to_string())
    }
}

#[cfg(feature = "openai")]
impl From<reqwest::Error> for MemoryCoreError {
    fn from(e: reqwest::Error) -> Self {
        MemoryCoreError::ProviderFailure(e.to_string())
    }
}
