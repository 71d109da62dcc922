//! Embedding generator implementation.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::normalize::NormalizationPolicy;
use super::sparse::{SparseConfig, SparseEncoder};
use crate::errors::PipelineError;
use crate::retry::{RetryError, RetryPolicy};
use vector_indexer_repository::{EmbeddingModel, EmbeddingTask, ServiceError};
use vector_indexer_shared::{Datapoint, Item, RejectReason, SparseVector};

/// Embedded datapoint, or the item handed back with the reason it was rejected.
pub type EmbedOutcome = Result<Datapoint, (Item, RejectReason)>;

/// Configuration for the embedding generator.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Maximum number of texts per model call.
    pub batch_size: usize,
    /// Output dimension expected by the index.
    pub dimension: usize,
    /// Normalization applied to dense vectors.
    pub normalization: NormalizationPolicy,
    /// Sparse vector settings used in hybrid mode.
    pub sparse: SparseConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            dimension: 768,
            normalization: NormalizationPolicy::UnitL2,
            sparse: SparseConfig::default(),
        }
    }
}

/// Generator that turns items into datapoints through the embedding model.
pub struct EmbeddingGenerator {
    model: Arc<dyn EmbeddingModel>,
    config: EmbeddingConfig,
    encoder: SparseEncoder,
    retry: RetryPolicy,
}

impl EmbeddingGenerator {
    /// Create a generator with default configuration.
    pub fn new(model: Arc<dyn EmbeddingModel>) -> Self {
        Self::with_config(model, EmbeddingConfig::default(), RetryPolicy::default())
    }

    /// Create a generator with custom configuration.
    pub fn with_config(
        model: Arc<dyn EmbeddingModel>,
        config: EmbeddingConfig,
        retry: RetryPolicy,
    ) -> Self {
        let encoder = SparseEncoder::new(config.sparse.clone());
        Self {
            model,
            config,
            encoder,
            retry,
        }
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    /// Embed items in model-sized batches.
    ///
    /// A batch that fails, or returns the wrong number of vectors, is retried
    /// item by item so that one bad input does not reject its siblings.
    ///
    /// # Arguments
    ///
    /// * `items` - Validated items
    /// * `hybrid` - Also produce sparse vectors
    ///
    /// # Returns
    ///
    /// One outcome per item, in input order. `Err` only for failures that
    /// must abort the run, such as `PermissionDenied`.
    #[instrument(skip(self, items), fields(item_count = items.len(), model = self.model.model_name()))]
    pub async fn embed_items(
        &self,
        items: Vec<Item>,
        hybrid: bool,
    ) -> Result<Vec<EmbedOutcome>, PipelineError> {
        let mut outcomes = Vec::with_capacity(items.len());
        let mut remaining = items;

        while !remaining.is_empty() {
            let split_at = remaining.len().min(self.config.batch_size.max(1));
            let rest = remaining.split_off(split_at);
            let chunk = std::mem::replace(&mut remaining, rest);
            outcomes.extend(self.embed_chunk(chunk, hybrid).await?);
        }

        debug!(
            embedded = outcomes.iter().filter(|o| o.is_ok()).count(),
            "Embedded item batch"
        );
        Ok(outcomes)
    }

    async fn embed_chunk(
        &self,
        chunk: Vec<Item>,
        hybrid: bool,
    ) -> Result<Vec<EmbedOutcome>, PipelineError> {
        let texts: Vec<String> = chunk.iter().map(|item| item.text.clone()).collect();
        let result = self
            .retry
            .run("embed_batch", || {
                self.model
                    .embed(&texts, EmbeddingTask::RetrievalDocument, self.config.dimension)
            })
            .await;

        match result {
            Ok(vectors) if vectors.len() == chunk.len() => Ok(chunk
                .into_iter()
                .zip(vectors)
                .map(|(item, vector)| self.finish(item, vector, hybrid))
                .collect()),
            Ok(vectors) => {
                warn!(
                    expected = chunk.len(),
                    returned = vectors.len(),
                    "Embedding batch returned wrong vector count, embedding items individually"
                );
                self.embed_individually(chunk, hybrid).await
            }
            Err(err) if is_fatal(&err.error) => Err(PipelineError::embedding(err.error)),
            Err(err) if chunk.len() == 1 => Ok(chunk
                .into_iter()
                .map(|item| Err((item, reject_reason(&err))))
                .collect()),
            Err(err) => {
                warn!(
                    error = %err.error,
                    attempts = err.attempts,
                    item_count = chunk.len(),
                    "Embedding batch failed, embedding items individually"
                );
                self.embed_individually(chunk, hybrid).await
            }
        }
    }

    async fn embed_individually(
        &self,
        chunk: Vec<Item>,
        hybrid: bool,
    ) -> Result<Vec<EmbedOutcome>, PipelineError> {
        let mut outcomes = Vec::with_capacity(chunk.len());

        for item in chunk {
            let text = [item.text.clone()];
            let result = self
                .retry
                .run("embed_item", || {
                    self.model
                        .embed(&text, EmbeddingTask::RetrievalDocument, self.config.dimension)
                })
                .await;

            let outcome = match result {
                Ok(mut vectors) if vectors.len() == 1 => {
                    let vector = vectors.remove(0);
                    self.finish(item, vector, hybrid)
                }
                Ok(vectors) => Err((
                    item,
                    RejectReason::EmbeddingFailed {
                        message: format!("model returned {} vectors for one input", vectors.len()),
                    },
                )),
                Err(err) if is_fatal(&err.error) => return Err(PipelineError::embedding(err.error)),
                Err(err) => {
                    debug!(item_id = %item.id, error = %err.error, "Item embedding failed");
                    Err((item, reject_reason(&err)))
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    fn finish(&self, item: Item, mut vector: Vec<f32>, hybrid: bool) -> EmbedOutcome {
        if vector.len() != self.config.dimension {
            let actual = vector.len();
            return Err((
                item,
                RejectReason::DimensionMismatch {
                    expected: self.config.dimension,
                    actual,
                },
            ));
        }
        self.config.normalization.apply(&mut vector);
        let sparse = hybrid.then(|| self.encoder.encode(&item.text));
        Ok(item.into_datapoint(vector, sparse))
    }

    /// Check and normalize a caller-supplied datapoint. No model call is made.
    pub fn prepare_preembedded(
        &self,
        mut datapoint: Datapoint,
    ) -> Result<Datapoint, (Datapoint, RejectReason)> {
        if datapoint.embedding.len() != self.config.dimension {
            let actual = datapoint.embedding.len();
            return Err((
                datapoint,
                RejectReason::DimensionMismatch {
                    expected: self.config.dimension,
                    actual,
                },
            ));
        }
        self.config.normalization.apply(&mut datapoint.embedding);
        Ok(datapoint)
    }

    /// Embed a search query.
    ///
    /// Uses the query task type and the same normalization as ingestion.
    #[instrument(skip(self, text))]
    pub async fn embed_query(
        &self,
        text: &str,
        hybrid: bool,
    ) -> Result<(Vec<f32>, Option<SparseVector>), PipelineError> {
        let texts = [text.to_string()];
        let mut vectors = self
            .retry
            .run("embed_query", || {
                self.model
                    .embed(&texts, EmbeddingTask::RetrievalQuery, self.config.dimension)
            })
            .await
            .map_err(|err| PipelineError::embedding(err.error))?;

        if vectors.len() != 1 {
            return Err(PipelineError::EmbeddingUnavailable(format!(
                "model returned {} vectors for one query",
                vectors.len()
            )));
        }
        let mut vector = vectors.remove(0);
        if vector.len() != self.config.dimension {
            return Err(PipelineError::ValidationFailure(format!(
                "query embedding has {} dimensions, expected {}",
                vector.len(),
                self.config.dimension
            )));
        }
        self.config.normalization.apply(&mut vector);
        Ok((vector, hybrid.then(|| self.encoder.encode(text))))
    }
}

fn is_fatal(error: &ServiceError) -> bool {
    matches!(error, ServiceError::PermissionDenied(_))
}

fn reject_reason(err: &RetryError) -> RejectReason {
    if err.exhausted() {
        RejectReason::RetriesExhausted {
            attempts: err.attempts,
            message: err.error.to_string(),
        }
    } else {
        RejectReason::EmbeddingFailed {
            message: err.error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_retry, MockEmbeddingModel};
    use vector_indexer_shared::Item;

    const DIM: usize = 8;

    fn generator(model: MockEmbeddingModel) -> (Arc<MockEmbeddingModel>, EmbeddingGenerator) {
        let model = Arc::new(model);
        let config = EmbeddingConfig {
            batch_size: 4,
            dimension: DIM,
            ..Default::default()
        };
        let generator = EmbeddingGenerator::with_config(model.clone(), config, fast_retry());
        (model, generator)
    }

    fn items(n: usize) -> Vec<Item> {
        (0..n)
            .map(|i| Item::new(i.to_string(), format!("course number {}", i)))
            .collect()
    }

    fn norm(vector: &[f32]) -> f32 {
        vector.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[tokio::test(start_paused = true)]
    async fn test_embeds_in_batches_with_unit_norm() {
        let (model, generator) = generator(MockEmbeddingModel::new());
        let outcomes = generator.embed_items(items(10), false).await.unwrap();

        assert_eq!(outcomes.len(), 10);
        assert_eq!(model.calls(), 3);
        for (i, outcome) in outcomes.iter().enumerate() {
            let datapoint = outcome.as_ref().unwrap();
            assert_eq!(datapoint.id, i.to_string());
            assert!((norm(&datapoint.embedding) - 1.0).abs() < 1e-5);
            assert!(datapoint.sparse_embedding.is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poisoned_item_does_not_reject_siblings() {
        let (_, generator) = generator(MockEmbeddingModel::new().poison("POISON"));
        let mut batch = items(4);
        batch[2].text = "POISON pill".to_string();

        let outcomes = generator.embed_items(batch, true).await.unwrap();
        assert!(outcomes[0].is_ok());
        assert!(outcomes[1].is_ok());
        assert!(outcomes[3].is_ok());
        let (item, reason) = outcomes[2].as_ref().unwrap_err();
        assert_eq!(item.id, "2");
        assert!(matches!(reason, RejectReason::RetriesExhausted { .. }));
        assert!(outcomes[0].as_ref().unwrap().sparse_embedding.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dimension_mismatch_rejects_item() {
        let (_, generator) = generator(MockEmbeddingModel::new().dimension_offset(1));
        let outcomes = generator.embed_items(items(2), false).await.unwrap();
        assert!(outcomes.iter().all(|o| matches!(
            o,
            Err((_, RejectReason::DimensionMismatch { expected: DIM, .. }))
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_is_fatal() {
        let (_, generator) = generator(
            MockEmbeddingModel::new().fail_with(ServiceError::permission_denied("no access")),
        );
        let result = generator.embed_items(items(3), false).await;
        assert!(matches!(result, Err(PipelineError::PermissionDenied(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_uses_query_task_and_normalizes() {
        let (model, generator) = generator(MockEmbeddingModel::new());
        let (vector, sparse) = generator.embed_query("rust basics", true).await.unwrap();
        assert!((norm(&vector) - 1.0).abs() < 1e-5);
        assert!(sparse.is_some());
        assert_eq!(model.last_task(), Some(EmbeddingTask::RetrievalQuery));
    }

    #[test]
    fn test_prepare_preembedded() {
        let (_, generator) = generator(MockEmbeddingModel::new());
        let mut datapoint = Datapoint::id_only("1");
        datapoint.embedding = vec![2.0; DIM];
        let prepared = generator.prepare_preembedded(datapoint).unwrap();
        assert!((norm(&prepared.embedding) - 1.0).abs() < 1e-5);

        let (_, reason) = generator
            .prepare_preembedded(Datapoint::id_only("2"))
            .unwrap_err();
        assert_eq!(
            reason,
            RejectReason::DimensionMismatch {
                expected: DIM,
                actual: 0
            }
        );
    }
}
