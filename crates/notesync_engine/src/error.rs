//! Error types for the sync engine.

use notesync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The request never got a response (connection refused, reset, DNS).
    #[error("network error: {0}")]
    Network(String),

    /// The request timed out.
    #[error("operation timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// A response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Local store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The configured server URL is unusable.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

impl SyncError {
    /// Creates an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// Network errors, timeouts and 5xx responses are transient. Client
    /// errors are final except 401 (token refresh) and 429 (rate limit).
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout => true,
            SyncError::Http { status, .. } => match *status {
                401 | 429 => true,
                400..=499 => false,
                s => s >= 500,
            },
            SyncError::Decode(_) | SyncError::Storage(_) | SyncError::InvalidUrl(_) => false,
        }
    }

    /// Returns true for local store failures, which abort a drain pass.
    pub fn is_storage(&self) -> bool {
        matches!(self, SyncError::Storage(_))
    }
}
