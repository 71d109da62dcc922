//! Error types for the vector indexer pipeline.

use thiserror::Error;

use vector_indexer_repository::ServiceError;

/// Category of error for determining retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure, retried with exponential backoff.
    Transient,
    /// Unrecoverable error, never retried.
    Permanent,
    /// Rate limit hit, retried with a longer backoff.
    RateLimited,
}

impl ErrorCategory {
    /// Classify a collaborator error.
    pub fn of(error: &ServiceError) -> Self {
        match error {
            ServiceError::RateLimited(_) => ErrorCategory::RateLimited,
            e if e.is_transient() => ErrorCategory::Transient,
            _ => ErrorCategory::Permanent,
        }
    }

    /// Multiplier applied to the base backoff delay.
    pub fn delay_factor(&self) -> u64 {
        match self {
            ErrorCategory::Transient => 1,
            ErrorCategory::Permanent => 0,
            ErrorCategory::RateLimited => 4,
        }
    }
}

/// Errors that can occur in the vector indexer pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The request is missing required fields or is inconsistent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A non-terminal run with the same id exists, or output already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unknown run id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The tabular source could not be reached.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The source refused the query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The embedding model could not be reached.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The vector index could not be reached.
    #[error("Ingestion unavailable: {0}")]
    IngestionUnavailable(String),

    /// The object store or audit store could not be reached.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A record failed validation.
    #[error("Validation failure: {0}")]
    ValidationFailure(String),

    /// A collaborator refused access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl PipelineError {
    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Map a tabular source failure.
    pub fn source(err: ServiceError) -> Self {
        match err {
            ServiceError::PermissionDenied(msg) => Self::PermissionDenied(msg),
            ServiceError::InvalidRequest(msg) | ServiceError::NotFound(msg) => {
                Self::InvalidQuery(msg)
            }
            other => Self::SourceUnavailable(other.to_string()),
        }
    }

    /// Map an embedding model failure.
    pub fn embedding(err: ServiceError) -> Self {
        match err {
            ServiceError::PermissionDenied(msg) => Self::PermissionDenied(msg),
            ServiceError::InvalidRequest(msg) => Self::InvalidArgument(msg),
            other => Self::EmbeddingUnavailable(other.to_string()),
        }
    }

    /// Map a vector index failure.
    pub fn ingestion(err: ServiceError) -> Self {
        match err {
            ServiceError::PermissionDenied(msg) => Self::PermissionDenied(msg),
            ServiceError::InvalidRequest(msg) | ServiceError::NotFound(msg) => {
                Self::InvalidArgument(msg)
            }
            other => Self::IngestionUnavailable(other.to_string()),
        }
    }

    /// Map an object store or audit store failure.
    pub fn storage(err: ServiceError) -> Self {
        match err {
            ServiceError::PermissionDenied(msg) => Self::PermissionDenied(msg),
            ServiceError::AlreadyExists(msg) => Self::Conflict(format!("already exists: {}", msg)),
            ServiceError::InvalidRequest(msg) | ServiceError::NotFound(msg) => {
                Self::InvalidArgument(msg)
            }
            other => Self::StorageUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_of_service_errors() {
        assert_eq!(
            ErrorCategory::of(&ServiceError::rate_limited("quota")),
            ErrorCategory::RateLimited
        );
        assert_eq!(
            ErrorCategory::of(&ServiceError::unavailable("down")),
            ErrorCategory::Transient
        );
        assert_eq!(
            ErrorCategory::of(&ServiceError::invalid_request("bad")),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn test_collaborator_mapping() {
        assert!(matches!(
            PipelineError::source(ServiceError::invalid_request("bad filter")),
            PipelineError::InvalidQuery(_)
        ));
        assert!(matches!(
            PipelineError::embedding(ServiceError::permission_denied("no")),
            PipelineError::PermissionDenied(_)
        ));
        assert!(matches!(
            PipelineError::storage(ServiceError::AlreadyExists("x".into())),
            PipelineError::Conflict(_)
        ));
        assert!(matches!(
            PipelineError::ingestion(ServiceError::unavailable("503")),
            PipelineError::IngestionUnavailable(_)
        ));
    }
}
