//! Audit store trait definition.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::errors::ServiceError;
use vector_indexer_shared::{Run, WatermarkKey};

/// Append-only record of run lifecycle events.
///
/// Every status transition of a run is appended as a full snapshot; the
/// latest snapshot per run id is its current state.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a run snapshot.
    async fn append(&self, run: &Run) -> Result<(), ServiceError>;

    /// Append a run snapshot only while the latest recorded snapshot belongs
    /// to the same attempt and is not terminal. Returns whether it was appended.
    async fn append_if_current(&self, run: &Run) -> Result<bool, ServiceError>;

    /// Flag a non-terminal run as cancel-requested by appending a flagged copy
    /// of its latest snapshot. Returns the latest snapshot afterwards.
    async fn request_cancel(&self, run_id: &str) -> Result<Option<Run>, ServiceError>;

    /// The latest snapshot of a run, if any was recorded.
    async fn latest(&self, run_id: &str) -> Result<Option<Run>, ServiceError>;

    /// Every snapshot of a run, oldest first.
    async fn history(&self, run_id: &str) -> Result<Vec<Run>, ServiceError>;

    /// Record identifiers ingested under `key`, for resumption.
    async fn save_watermark(&self, key: &WatermarkKey, ids: &[String]) -> Result<(), ServiceError>;

    /// Identifiers ingested by earlier attempts under `key`.
    async fn watermark(&self, key: &WatermarkKey) -> Result<HashSet<String>, ServiceError>;
}
