//! Vector index trait definition.

use async_trait::async_trait;

use crate::errors::ServiceError;
use crate::types::{BatchOperationSummary, BatchUpdateOperation, Neighbor, NeighborQuery};
use vector_indexer_shared::Datapoint;

/// Abstract interface for the vector index.
///
/// Upserts and removals are keyed by datapoint identifier and idempotent:
/// repeating a call leaves the index in the same state.
///
/// # Error Handling
///
/// A whole-call failure is returned as `Err`. Per-datapoint failures of an
/// accepted call are reported in the returned [`BatchOperationSummary`].
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace datapoints by identifier.
    async fn upsert(&self, datapoints: &[Datapoint]) -> Result<BatchOperationSummary, ServiceError>;

    /// Remove datapoints by identifier. Absent identifiers count as removed.
    async fn remove(&self, ids: &[String]) -> Result<BatchOperationSummary, ServiceError>;

    /// Start a batch ingestion of every shard under `contents_uri`.
    ///
    /// # Arguments
    ///
    /// * `contents_uri` - Object-store prefix holding newline-delimited datapoints
    /// * `complete_overwrite` - Replace the whole index content with the prefix content
    ///
    /// # Returns
    ///
    /// * `Ok(BatchUpdateOperation)` - The accepted operation
    /// * `Err(ServiceError::InvalidRequest)` - If the prefix holds no files
    async fn batch_update(
        &self,
        contents_uri: &str,
        complete_overwrite: bool,
    ) -> Result<BatchUpdateOperation, ServiceError>;

    /// Nearest-neighbor search.
    async fn find_neighbors(&self, query: &NeighborQuery) -> Result<Vec<Neighbor>, ServiceError>;

    /// Check if the index is healthy and reachable.
    async fn health_check(&self) -> Result<bool, ServiceError> {
        Ok(true)
    }
}
