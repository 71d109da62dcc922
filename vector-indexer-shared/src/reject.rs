//! Reject records for records that failed a pipeline stage.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Read,
    Validate,
    Embed,
    Write,
    Ingest,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Read => "READ",
            Stage::Validate => "VALIDATE",
            Stage::Embed => "EMBED",
            Stage::Write => "WRITE",
            Stage::Ingest => "INGEST",
        };
        f.write_str(name)
    }
}

/// Why a record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// The identifier field is absent, null or blank.
    MissingIdentifier,
    /// Neither text nor metadata fields carry a value.
    EmptyContent,
    /// The serialized record exceeds the configured limit.
    PayloadTooLarge { size: usize, limit: usize },
    /// A field holds a type the schema cannot accept.
    IncompatibleType { field: String, expected: String },
    /// A pre-embedded datapoint could not be parsed.
    Malformed { message: String },
    /// The vector has the wrong number of dimensions.
    DimensionMismatch { expected: usize, actual: usize },
    /// The embedding model refused the input.
    EmbeddingFailed { message: String },
    /// The vector index refused the record.
    IngestionRejected { message: String },
    /// A transient failure outlived the retry budget.
    RetriesExhausted { attempts: u32, message: String },
}

impl RejectReason {
    /// Stable short code used for per-reason tallies.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MissingIdentifier => "missing_identifier",
            RejectReason::EmptyContent => "empty_content",
            RejectReason::PayloadTooLarge { .. } => "payload_too_large",
            RejectReason::IncompatibleType { .. } => "incompatible_type",
            RejectReason::Malformed { .. } => "malformed",
            RejectReason::DimensionMismatch { .. } => "dimension_mismatch",
            RejectReason::EmbeddingFailed { .. } => "embedding_failed",
            RejectReason::IngestionRejected { .. } => "ingestion_rejected",
            RejectReason::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingIdentifier => write!(f, "missing identifier"),
            RejectReason::EmptyContent => write!(f, "no text or metadata fields"),
            RejectReason::PayloadTooLarge { size, limit } => {
                write!(f, "payload of {} bytes exceeds limit of {}", size, limit)
            }
            RejectReason::IncompatibleType { field, expected } => {
                write!(f, "field '{}' must be {}", field, expected)
            }
            RejectReason::Malformed { message } => write!(f, "malformed datapoint: {}", message),
            RejectReason::DimensionMismatch { expected, actual } => {
                write!(f, "expected {} dimensions, got {}", expected, actual)
            }
            RejectReason::EmbeddingFailed { message } => write!(f, "embedding failed: {}", message),
            RejectReason::IngestionRejected { message } => {
                write!(f, "ingestion rejected: {}", message)
            }
            RejectReason::RetriesExhausted { attempts, message } => {
                write!(f, "gave up after {} attempts: {}", attempts, message)
            }
        }
    }
}

/// A record diverted out of the pipeline, with its original payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectRecord {
    /// Item identifier, when it could be determined.
    pub item_id: Option<String>,
    /// Stage that rejected the record.
    pub stage: Stage,
    /// Failure reason.
    pub reason: RejectReason,
    /// The payload as it entered the failing stage.
    pub payload: Value,
    /// When the record was rejected.
    pub rejected_at: DateTime<Utc>,
}

impl RejectRecord {
    /// Create a reject record stamped with the current time.
    pub fn new(item_id: Option<String>, stage: Stage, reason: RejectReason, payload: Value) -> Self {
        Self {
            item_id,
            stage,
            reason,
            payload,
            rejected_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_order() {
        assert!(Stage::Read < Stage::Validate);
        assert!(Stage::Embed < Stage::Write);
        assert!(Stage::Write < Stage::Ingest);
    }

    #[test]
    fn test_reason_serialization() {
        let reason = RejectReason::DimensionMismatch {
            expected: 768,
            actual: 3,
        };
        let value = serde_json::to_value(&reason).unwrap();
        assert_eq!(
            value,
            json!({"kind": "dimension_mismatch", "expected": 768, "actual": 3})
        );
        assert_eq!(reason.code(), "dimension_mismatch");
    }
}
