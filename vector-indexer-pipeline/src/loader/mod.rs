//! Loader module for the vector indexer pipeline.
//!
//! Loads datapoints into the vector index, record by record or as a batch update.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::errors::PipelineError;
use crate::retry::{RetryError, RetryPolicy};
use vector_indexer_repository::{
    BatchOperationSummary, BatchUpdateOperation, ServiceError, VectorIndex,
};
use vector_indexer_shared::{Datapoint, RejectReason};

/// Configuration for the index loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Number of datapoints per streaming call.
    pub batch_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// Per-record result of a streaming call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestOutcome {
    /// Identifiers the index accepted.
    pub ingested: Vec<String>,
    /// Identifiers the index refused, with the reason.
    pub rejected: Vec<(String, RejectReason)>,
}

impl IngestOutcome {
    fn merge(&mut self, other: IngestOutcome) {
        self.ingested.extend(other.ingested);
        self.rejected.extend(other.rejected);
    }
}

#[derive(Clone, Copy)]
enum Batch<'a> {
    Upsert(&'a [Datapoint]),
    Remove(&'a [String]),
}

impl<'a> Batch<'a> {
    fn len(&self) -> usize {
        match self {
            Batch::Upsert(datapoints) => datapoints.len(),
            Batch::Remove(ids) => ids.len(),
        }
    }

    fn id(&self, position: usize) -> &'a str {
        match self {
            Batch::Upsert(datapoints) => &datapoints[position].id,
            Batch::Remove(ids) => &ids[position],
        }
    }

    fn single(&self, position: usize) -> Batch<'a> {
        match self {
            Batch::Upsert(datapoints) => Batch::Upsert(&datapoints[position..=position]),
            Batch::Remove(ids) => Batch::Remove(&ids[position..=position]),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Batch::Upsert(_) => "upsert_datapoints",
            Batch::Remove(_) => "remove_datapoints",
        }
    }
}

/// Loader that pushes datapoints into the vector index.
///
/// Streaming calls report per-record outcomes. A call the index refuses as a
/// whole is retried record by record so that valid siblings still land.
pub struct IndexLoader {
    index: Arc<dyn VectorIndex>,
    config: LoaderConfig,
    retry: RetryPolicy,
}

impl IndexLoader {
    /// Create a new loader with the given index.
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self::with_config(index, LoaderConfig::default(), RetryPolicy::default())
    }

    /// Create a new loader with custom configuration.
    pub fn with_config(index: Arc<dyn VectorIndex>, config: LoaderConfig, retry: RetryPolicy) -> Self {
        Self {
            index,
            config,
            retry,
        }
    }

    /// Upsert datapoints by identifier.
    ///
    /// # Returns
    ///
    /// Per-record outcomes; `Err` only for failures that must abort the run.
    #[instrument(skip(self, datapoints), fields(count = datapoints.len()))]
    pub async fn upsert(&self, datapoints: &[Datapoint]) -> Result<IngestOutcome, PipelineError> {
        let mut outcome = IngestOutcome::default();
        for chunk in datapoints.chunks(self.config.batch_size.max(1)) {
            outcome.merge(self.ingest(Batch::Upsert(chunk)).await?);
        }
        debug!(
            ingested = outcome.ingested.len(),
            rejected = outcome.rejected.len(),
            "Upserted datapoints"
        );
        Ok(outcome)
    }

    /// Remove datapoints by identifier. Absent identifiers count as removed.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn remove(&self, ids: &[String]) -> Result<IngestOutcome, PipelineError> {
        let mut outcome = IngestOutcome::default();
        for chunk in ids.chunks(self.config.batch_size.max(1)) {
            outcome.merge(self.ingest(Batch::Remove(chunk)).await?);
        }
        debug!(
            removed = outcome.ingested.len(),
            rejected = outcome.rejected.len(),
            "Removed datapoints"
        );
        Ok(outcome)
    }

    /// Ask the index to ingest every shard under `contents_uri`.
    #[instrument(skip(self))]
    pub async fn batch_update(
        &self,
        contents_uri: &str,
        complete_overwrite: bool,
    ) -> Result<BatchUpdateOperation, PipelineError> {
        let operation = self
            .retry
            .run("batch_update", || {
                self.index.batch_update(contents_uri, complete_overwrite)
            })
            .await
            .map_err(|err| {
                error!(error = %err.error, attempts = err.attempts, "Batch update failed");
                PipelineError::ingestion(err.error)
            })?;

        info!(
            operation_id = %operation.operation_id,
            files = operation.files.len(),
            "Batch update accepted"
        );
        Ok(operation)
    }

    async fn call(&self, batch: Batch<'_>) -> Result<BatchOperationSummary, RetryError> {
        self.retry
            .run(batch.name(), || async move {
                match batch {
                    Batch::Upsert(datapoints) => self.index.upsert(datapoints).await,
                    Batch::Remove(ids) => self.index.remove(ids).await,
                }
            })
            .await
    }

    async fn ingest(&self, batch: Batch<'_>) -> Result<IngestOutcome, PipelineError> {
        let mut outcome = IngestOutcome::default();

        match self.call(batch).await {
            Ok(summary) => {
                let positions: HashMap<&str, usize> = (0..batch.len())
                    .rev()
                    .map(|position| (batch.id(position), position))
                    .collect();
                let mut retry_positions = Vec::new();

                for result in summary.results {
                    if result.success {
                        outcome.ingested.push(result.id);
                        continue;
                    }
                    let error = result
                        .error
                        .unwrap_or_else(|| ServiceError::unavailable("no result reported"));
                    match positions.get(result.id.as_str()) {
                        Some(position) if error.is_transient() && batch.len() > 1 => {
                            retry_positions.push(*position)
                        }
                        _ => outcome.rejected.push((result.id, item_reason(&error, 1))),
                    }
                }

                for position in retry_positions {
                    outcome.merge(self.ingest_single(batch.single(position)).await?);
                }
            }
            Err(err) if is_fatal(&err.error) => return Err(PipelineError::ingestion(err.error)),
            Err(err) if err.exhausted() || batch.len() == 1 => {
                warn!(error = %err.error, count = batch.len(), "Streaming ingestion call failed");
                for position in 0..batch.len() {
                    outcome
                        .rejected
                        .push((batch.id(position).to_string(), item_reason(&err.error, err.attempts)));
                }
            }
            Err(err) => {
                warn!(
                    error = %err.error,
                    count = batch.len(),
                    "Index refused batch, ingesting records individually"
                );
                for position in 0..batch.len() {
                    outcome.merge(self.ingest_single(batch.single(position)).await?);
                }
            }
        }

        Ok(outcome)
    }

    async fn ingest_single(&self, batch: Batch<'_>) -> Result<IngestOutcome, PipelineError> {
        let id = batch.id(0).to_string();
        let mut outcome = IngestOutcome::default();

        match self.call(batch).await {
            Ok(summary) => match summary.failures().next() {
                None => outcome.ingested.push(id),
                Some(failure) => {
                    let reason = match &failure.error {
                        Some(error) => item_reason(error, self.retry.max_attempts),
                        None => RejectReason::IngestionRejected {
                            message: "refused without detail".to_string(),
                        },
                    };
                    outcome.rejected.push((id, reason));
                }
            },
            Err(err) if is_fatal(&err.error) => return Err(PipelineError::ingestion(err.error)),
            Err(err) => outcome.rejected.push((id, item_reason(&err.error, err.attempts))),
        }

        Ok(outcome)
    }
}

fn is_fatal(error: &ServiceError) -> bool {
    matches!(error, ServiceError::PermissionDenied(_))
}

fn item_reason(error: &ServiceError, attempts: u32) -> RejectReason {
    if error.is_transient() {
        RejectReason::RetriesExhausted {
            attempts,
            message: error.to_string(),
        }
    } else {
        RejectReason::IngestionRejected {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fast_retry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vector_indexer_repository::{BatchOperationResult, Neighbor, NeighborQuery};

    /// Mock index refusing ids that start with `bad` and whole calls containing `reject`.
    struct MockIndex {
        calls: AtomicUsize,
        failure: Option<ServiceError>,
    }

    impl MockIndex {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failure: None,
            }
        }

        fn summary(ids: impl Iterator<Item = String>) -> Result<BatchOperationSummary, ServiceError> {
            let ids: Vec<String> = ids.collect();
            if ids.len() > 1 && ids.iter().any(|id| id.starts_with("reject")) {
                return Err(ServiceError::invalid_request("malformed bulk body"));
            }
            Ok(BatchOperationSummary::from_results(
                ids.into_iter()
                    .map(|id| {
                        if id.starts_with("bad") || id.starts_with("reject") {
                            BatchOperationResult::failed(id, ServiceError::invalid_request("mapping"))
                        } else {
                            BatchOperationResult::ok(id)
                        }
                    })
                    .collect(),
            ))
        }
    }

    #[async_trait]
    impl VectorIndex for MockIndex {
        async fn upsert(&self, datapoints: &[Datapoint]) -> Result<BatchOperationSummary, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = &self.failure {
                return Err(error.clone());
            }
            Self::summary(datapoints.iter().map(|d| d.id.clone()))
        }

        async fn remove(&self, ids: &[String]) -> Result<BatchOperationSummary, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = &self.failure {
                return Err(error.clone());
            }
            Self::summary(ids.iter().cloned())
        }

        async fn batch_update(
            &self,
            contents_uri: &str,
            _complete_overwrite: bool,
        ) -> Result<BatchUpdateOperation, ServiceError> {
            Err(ServiceError::invalid_request(format!("no files under {}", contents_uri)))
        }

        async fn find_neighbors(&self, _query: &NeighborQuery) -> Result<Vec<Neighbor>, ServiceError> {
            Ok(Vec::new())
        }
    }

    fn datapoints(ids: &[&str]) -> Vec<Datapoint> {
        ids.iter().map(|id| Datapoint::id_only(*id)).collect()
    }

    fn loader(index: MockIndex) -> (Arc<MockIndex>, IndexLoader) {
        let index = Arc::new(index);
        let loader = IndexLoader::with_config(index.clone(), LoaderConfig { batch_size: 3 }, fast_retry());
        (index, loader)
    }

    #[tokio::test]
    async fn test_upsert_reports_per_record_outcomes() {
        let (index, loader) = loader(MockIndex::new());
        let outcome = loader.upsert(&datapoints(&["1", "bad-2", "3", "4"])).await.unwrap();

        assert_eq!(outcome.ingested, vec!["1", "3", "4"]);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].0, "bad-2");
        assert!(matches!(outcome.rejected[0].1, RejectReason::IngestionRejected { .. }));
        assert_eq!(index.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refused_batch_falls_back_to_single_records() {
        let (_, loader) = loader(MockIndex::new());
        let outcome = loader.upsert(&datapoints(&["1", "reject-2", "3"])).await.unwrap();

        assert_eq!(outcome.ingested, vec!["1", "3"]);
        assert_eq!(outcome.rejected[0].0, "reject-2");
    }

    #[tokio::test]
    async fn test_exhausted_retries_reject_the_chunk() {
        let (index, loader) = loader(MockIndex {
            failure: Some(ServiceError::unavailable("index down")),
            ..MockIndex::new()
        });
        let outcome = loader.remove(&["1".to_string(), "2".to_string()]).await.unwrap();

        assert!(outcome.ingested.is_empty());
        assert!(outcome
            .rejected
            .iter()
            .all(|(_, r)| matches!(r, RejectReason::RetriesExhausted { attempts: 2, .. })));
        assert_eq!(index.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permission_denied_is_fatal() {
        let (_, loader) = loader(MockIndex {
            failure: Some(ServiceError::permission_denied("read-only")),
            ..MockIndex::new()
        });
        let result = loader.upsert(&datapoints(&["1"])).await;
        assert!(matches!(result, Err(PipelineError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_batch_update_on_empty_prefix_is_invalid_argument() {
        let (_, loader) = loader(MockIndex::new());
        let result = loader.batch_update("gs://bucket/empty", false).await;
        assert!(matches!(result, Err(PipelineError::InvalidArgument(_))));
    }
}
