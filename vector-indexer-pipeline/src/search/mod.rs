//! Search module for the vector indexer pipeline.
//!
//! Serves similarity queries against the vector index.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::embedding::EmbeddingGenerator;
use crate::errors::PipelineError;
use crate::retry::RetryPolicy;
use vector_indexer_repository::{
    NamespaceFilter, Neighbor, NeighborQuery, ObjectStore, ObjectUri, ServiceError, VectorIndex,
};

/// Query input: text to embed, or a vector used as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryInput {
    /// Embedded with the query task type and normalized like stored vectors.
    Text(String),
    /// Caller-supplied vector, passed through without normalization.
    Vector(Vec<f32>),
}

/// A similarity search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(flatten)]
    pub input: QueryInput,
    /// Number of neighbors; defaults to the configured value.
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Namespace filters; all must match.
    #[serde(default)]
    pub filters: Vec<NamespaceFilter>,
    /// Add a sparse query vector (text queries only).
    #[serde(default)]
    pub hybrid: Option<bool>,
}

impl SearchRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            input: QueryInput::Text(text.into()),
            top_k: None,
            filters: Vec::new(),
            hybrid: None,
        }
    }

    pub fn vector(vector: Vec<f32>) -> Self {
        Self {
            input: QueryInput::Vector(vector),
            top_k: None,
            filters: Vec::new(),
            hybrid: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_filter(mut self, filter: NamespaceFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Configuration for the search service.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Neighbors returned when the request does not say.
    pub default_top_k: usize,
    /// Generate sparse query vectors when the request does not say.
    pub hybrid_default: bool,
    /// Shards to read missing metadata from, `gs://bucket/path`.
    pub metadata_prefix: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            hybrid_default: false,
            metadata_prefix: None,
        }
    }
}

/// Service answering neighbor queries.
pub struct SearchService {
    embedder: Arc<EmbeddingGenerator>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn ObjectStore>,
    config: SearchConfig,
    retry: RetryPolicy,
}

impl SearchService {
    pub fn new(
        embedder: Arc<EmbeddingGenerator>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn ObjectStore>,
        config: SearchConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            config,
            retry,
        }
    }

    /// Find the nearest neighbors of a query.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - Blank text, a zero `top_k` or a vector of the wrong dimension
    #[instrument(skip(self, request), fields(top_k = ?request.top_k, filters = request.filters.len()))]
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<Neighbor>, PipelineError> {
        let top_k = request.top_k.unwrap_or(self.config.default_top_k);
        if top_k == 0 {
            return Err(PipelineError::invalid_argument("top_k must be positive"));
        }

        let (vector, sparse) = match &request.input {
            QueryInput::Text(text) if text.trim().is_empty() => {
                return Err(PipelineError::invalid_argument("query text is empty"))
            }
            QueryInput::Text(text) => {
                let hybrid = request.hybrid.unwrap_or(self.config.hybrid_default);
                self.embedder.embed_query(text, hybrid).await?
            }
            QueryInput::Vector(vector) => {
                let expected = self.embedder.config().dimension;
                if vector.len() != expected {
                    return Err(PipelineError::invalid_argument(format!(
                        "query vector has {} dimensions, expected {}",
                        vector.len(),
                        expected
                    )));
                }
                (vector.clone(), None)
            }
        };

        let query = NeighborQuery {
            vector,
            sparse,
            top_k,
            filters: request.filters.clone(),
        };
        let mut neighbors = self
            .retry
            .run("find_neighbors", || self.index.find_neighbors(&query))
            .await
            .map_err(|err| PipelineError::ingestion(err.error))?;

        self.backfill_metadata(&mut neighbors).await;
        debug!(hits = neighbors.len(), "Search complete");
        Ok(neighbors)
    }

    async fn backfill_metadata(&self, neighbors: &mut [Neighbor]) {
        let Some(prefix) = &self.config.metadata_prefix else {
            return;
        };
        let missing: HashSet<String> = neighbors
            .iter()
            .filter(|n| n.metadata.is_none())
            .map(|n| n.id.clone())
            .collect();
        if missing.is_empty() {
            return;
        }

        match self.load_metadata(prefix, missing).await {
            Ok(found) => {
                for neighbor in neighbors.iter_mut().filter(|n| n.metadata.is_none()) {
                    neighbor.metadata = found.get(&neighbor.id).cloned();
                }
            }
            Err(e) => warn!(prefix = %prefix, error = %e, "Metadata lookup failed"),
        }
    }

    /// Collect `embedding_metadata` of the wanted ids from the shards under `prefix`.
    async fn load_metadata(
        &self,
        prefix: &str,
        mut wanted: HashSet<String>,
    ) -> Result<HashMap<String, Map<String, Value>>, ServiceError> {
        let prefix: ObjectUri = prefix.parse()?;
        let files = self.store.list(&prefix).await?;
        let mut found = HashMap::new();

        for file in files {
            if wanted.is_empty() {
                break;
            }
            let bytes = self.store.get(&file).await?;
            for line in String::from_utf8_lossy(&bytes).lines() {
                let Ok(Value::Object(record)) = serde_json::from_str::<Value>(line) else {
                    continue;
                };
                let (Some(Value::String(id)), Some(Value::Object(metadata))) =
                    (record.get("id"), record.get("embedding_metadata"))
                else {
                    continue;
                };
                if wanted.remove(id) {
                    found.insert(id.clone(), metadata.clone());
                }
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingConfig;
    use crate::test_support::{fast_retry, MockEmbeddingModel};
    use serde_json::json;
    use vector_indexer_repository::memory::{InMemoryObjectStore, InMemoryVectorIndex};
    use vector_indexer_shared::{Datapoint, DistanceMeasure, Restrict};

    const DIM: usize = 4;

    fn datapoint(id: &str, embedding: Vec<f32>, metadata: Option<Value>) -> Datapoint {
        Datapoint {
            embedding,
            embedding_metadata: metadata.and_then(|m| m.as_object().cloned()),
            ..Datapoint::id_only(id)
        }
    }

    async fn service(metadata_prefix: Option<&str>) -> (Arc<InMemoryObjectStore>, SearchService) {
        let store = Arc::new(InMemoryObjectStore::new());
        let index = Arc::new(InMemoryVectorIndex::new(DIM, DistanceMeasure::DotProduct, store.clone()));
        let mut tagged = datapoint("b", vec![0.0, 1.0, 0.0, 0.0], None);
        tagged.restricts.push(Restrict::allow("level", vec!["Beginner".to_string()]));
        index
            .upsert(&[
                datapoint("a", vec![1.0, 0.0, 0.0, 0.0], Some(json!({"title": "A"}))),
                tagged,
                datapoint("c", vec![0.0, 0.0, 1.0, 0.0], None),
            ])
            .await
            .unwrap();

        let embedder = Arc::new(EmbeddingGenerator::with_config(
            Arc::new(MockEmbeddingModel::new()),
            EmbeddingConfig {
                dimension: DIM,
                ..Default::default()
            },
            fast_retry(),
        ));
        let config = SearchConfig {
            metadata_prefix: metadata_prefix.map(str::to_string),
            ..Default::default()
        };
        let service = SearchService::new(embedder, index, store.clone(), config, fast_retry());
        (store, service)
    }

    #[tokio::test]
    async fn test_vector_query_passes_through() {
        let (_, service) = service(None).await;
        let hits = service
            .search(&SearchRequest::vector(vec![0.0, 2.0, 0.0, 0.0]).with_top_k(1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        // Unnormalized query, unnormalized score.
        assert_eq!(hits[0].score, 2.0);
    }

    #[tokio::test]
    async fn test_text_query_defaults_to_ten_and_filters() {
        let (_, service) = service(None).await;
        let hits = service.search(&SearchRequest::text("anything")).await.unwrap();
        assert_eq!(hits.len(), 3);

        let filtered = service
            .search(
                &SearchRequest::text("anything")
                    .with_filter(NamespaceFilter::allow("level", vec!["Beginner".to_string()])),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "b");
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let (_, service) = service(None).await;
        for request in [
            SearchRequest::text("   "),
            SearchRequest::text("x").with_top_k(0),
            SearchRequest::vector(vec![1.0]),
        ] {
            assert!(matches!(
                service.search(&request).await,
                Err(PipelineError::InvalidArgument(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_missing_metadata_is_backfilled_from_shards() {
        let (store, service) = service(Some("gs://bucket/batch")).await;
        let shard: ObjectUri = "gs://bucket/batch/run-1/data/part-00000.json".parse().unwrap();
        let body = concat!(
            "{\"id\":\"b\",\"embedding_metadata\":{\"title\":\"B\"}}\n",
            "[1, 2]\n",
            "{\"id\":\"zzz\",\"embedding_metadata\":{\"title\":\"Z\"}}\n",
        );
        store.put(&shard, body.as_bytes().to_vec(), true).await.unwrap();

        let hits = service
            .search(&SearchRequest::vector(vec![0.0, 1.0, 0.0, 0.0]))
            .await
            .unwrap();
        let b = hits.iter().find(|h| h.id == "b").unwrap();
        assert_eq!(b.metadata.as_ref().unwrap()["title"], json!("B"));
        let c = hits.iter().find(|h| h.id == "c").unwrap();
        assert!(c.metadata.is_none());
        let a = hits.iter().find(|h| h.id == "a").unwrap();
        assert_eq!(a.metadata.as_ref().unwrap()["title"], json!("A"));
    }
}
