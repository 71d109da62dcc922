//! # Vector Indexer Shared
//!
//! Shared types for the vector indexer: the canonical item model, the
//! ingestible datapoint format written to shards, reject records, and the
//! run request/status types exchanged with the orchestrator.

mod item;
mod reject;
mod request;
mod run;
mod vector;

pub use item::{Datapoint, Item, NumericRestrict, NumericValue, RawRecord, Restrict};
pub use reject::{RejectReason, RejectRecord, Stage};
pub use request::{DatapointSource, RunRequest};
pub use run::{
    IngestionPath, RejectSummary, Run, RunCounts, RunStatus, SourceDescriptor, UpdateMode,
    UpdateType, WatermarkKey,
};
pub use vector::{DistanceMeasure, SparseVector};
