//! Run status types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reject::{RejectReason, Stage};

/// What triggered the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateType {
    #[default]
    Scheduled,
    Manual,
}

/// How the run changes the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateMode {
    /// Insert or replace datapoints by identifier.
    Upsert,
    /// Remove datapoints by identifier.
    Delete,
    /// Replace the whole index content with the run output.
    Overwrite,
}

/// How produced shards reach the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionPath {
    /// Each shard is upserted/removed record by record as it is flushed.
    Streaming,
    /// The index ingests the whole run prefix once all shards are written.
    Batch,
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal states never change once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Per-stage record counts.
///
/// `skipped` counts records read but left out because a previous attempt of the
/// same run already ingested them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub read: u64,
    pub embedded: u64,
    pub written: u64,
    pub ingested: u64,
    #[serde(default)]
    pub skipped: u64,
}

impl RunCounts {
    /// `ingested <= written <= embedded <= read`.
    pub fn is_consistent(&self) -> bool {
        self.ingested <= self.written && self.written <= self.embedded && self.embedded <= self.read
    }

    /// Whether every count is at least the matching count in `earlier`.
    pub fn dominates(&self, earlier: &RunCounts) -> bool {
        self.read >= earlier.read
            && self.embedded >= earlier.embedded
            && self.written >= earlier.written
            && self.ingested >= earlier.ingested
            && self.skipped >= earlier.skipped
    }
}

/// Aggregate view of the rejects of a run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RejectSummary {
    /// Total reject records written.
    pub total: u64,
    /// Tally per reason code.
    pub by_reason: BTreeMap<String, u64>,
    /// Tally per stage.
    pub by_stage: BTreeMap<Stage, u64>,
    /// Object-store prefix holding the reject shards.
    pub location: Option<String>,
}

impl RejectSummary {
    /// Count one reject.
    pub fn record(&mut self, stage: Stage, reason: &RejectReason) {
        self.total += 1;
        *self.by_reason.entry(reason.code().to_string()).or_insert(0) += 1;
        *self.by_stage.entry(stage).or_insert(0) += 1;
    }
}

/// Where the records of a run come from, without inline payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDescriptor {
    Query { table: String, filter: String },
    GcsPrefix { prefix: String },
    ApiPayload { datapoints: usize },
}

/// One execution of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub update_type: UpdateType,
    pub mode: UpdateMode,
    pub source: SourceDescriptor,
    pub output_prefix: String,
    pub status: RunStatus,
    /// Furthest stage reached.
    pub stage: Option<Stage>,
    pub ingestion: IngestionPath,
    pub hybrid: bool,
    pub counts: RunCounts,
    pub rejects: RejectSummary,
    /// Shards produced, in flush order.
    pub shards: Vec<String>,
    pub cancel_requested: bool,
    /// Identifies the attempt; a re-issued run id gets a new one.
    pub created_at: DateTime<Utc>,
    /// Last time the driving process vouched for the run.
    #[serde(default)]
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Run {
    /// Whether the run reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `other` is a snapshot of the same attempt.
    pub fn same_attempt(&self, other: &Run) -> bool {
        self.run_id == other.run_id && self.created_at == other.created_at
    }

    /// Latest sign of life from the process driving the run.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.heartbeat_at.unwrap_or(self.created_at)
    }
}

/// Scope of a resume watermark.
///
/// Ids ingested by one attempt are only skipped by a later attempt with the
/// same run id, mode and source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatermarkKey {
    pub run_id: String,
    pub mode: UpdateMode,
    pub source: SourceDescriptor,
}

impl WatermarkKey {
    pub fn of(run: &Run) -> Self {
        Self {
            run_id: run.run_id.clone(),
            mode: run.mode,
            source: run.source.clone(),
        }
    }
}
