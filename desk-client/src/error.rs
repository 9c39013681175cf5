//! Client error types
//!
//! `ClientError` is what the HTTP layer produces. `SyncError` is what the
//! synchronization core records on cache entries and hands back to callers;
//! it is `Clone` because one deduplicated read resolves many waiters.

use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid response format
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Authentication required
    #[error("Authentication required: {0}")]
    Unauthorized(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Any other non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// HTTP status carried by this error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http(e) => e.status().map(|s| s.as_u16()),
            ClientError::Unauthorized(_) => Some(401),
            ClientError::Forbidden(_) => Some(403),
            ClientError::NotFound(_) => Some(404),
            ClientError::Validation(_) => Some(400),
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Synchronization error kinds
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Transport-level failure, no response (includes timeouts)
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The remote store answered with a non-success status
    #[error("rejected by server ({status}): {message}")]
    RemoteRejection { status: u16, message: String },

    /// A response older than the entry's generation; dropped, never surfaced
    #[error("stale response discarded (generation {generation} < {current})")]
    StaleResponseDiscarded { generation: u64, current: u64 },

    /// A mutation is already pending for the key. Mutations queue instead of
    /// failing, so the executor never returns this.
    #[error("mutation already in flight for {0}")]
    ConcurrentMutationRejected(String),

    /// The operation needs a cached value that is not there yet
    #[error("no cached value for {0}")]
    NotCached(String),

    /// The response body could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rejected locally before any remote call
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::NetworkFailure(_))
    }
}

impl From<ClientError> for SyncError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Http(e) if e.is_decode() => SyncError::InvalidResponse(e.to_string()),
            ClientError::Http(e) => match e.status() {
                Some(status) => SyncError::RemoteRejection {
                    status: status.as_u16(),
                    message: e.to_string(),
                },
                None => SyncError::NetworkFailure(e.to_string()),
            },
            ClientError::InvalidResponse(message) => SyncError::InvalidResponse(message),
            ClientError::Serialization(e) => SyncError::InvalidResponse(e.to_string()),
            ClientError::Config(message) => SyncError::InvalidInput(message),
            other => {
                // status() is Some for every remaining variant
                let status = other.status().unwrap_or(500);
                SyncError::RemoteRejection {
                    status,
                    message: other.to_string(),
                }
            }
        }
    }
}

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;
