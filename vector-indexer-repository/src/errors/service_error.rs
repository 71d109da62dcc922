//! Collaborator error types.
//!
//! Every external call (tabular source, embedding model, object store,
//! vector index, audit store) reports failures through [`ServiceError`].
//! Callers decide whether to retry from [`ServiceError::is_transient`].

use std::time::Duration;

use thiserror::Error;

/// Errors returned by external collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// The service could not be reached or failed internally.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The service asked the caller to slow down.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The call did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The request was malformed or refused as invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The addressed object or record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The object already exists and overwriting was not allowed.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Data could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ServiceError {
    /// Create an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a rate limited error.
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a permission denied error.
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Unavailable(_) | ServiceError::RateLimited(_) | ServiceError::Timeout(_)
        )
    }

    /// Map an HTTP status returned by a remote service.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            404 => Self::NotFound(body),
            401 | 403 => Self::PermissionDenied(format!("status {}: {}", status, body)),
            // request timeout
            408 => Self::Unavailable(format!("status {}: {}", status, body)),
            429 => Self::RateLimited(body),
            400..=499 => Self::InvalidRequest(format!("status {}: {}", status, body)),
            _ => Self::Unavailable(format!("status {}: {}", status, body)),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(err.to_string()),
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::InvalidInput => {
                Self::Serialization(err.to_string())
            }
            _ => Self::Unavailable(err.to_string()),
        }
    }
}
