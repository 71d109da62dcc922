//! Dependency initialization and wiring for the vector indexer.

use std::sync::Arc;

use tracing::{info, warn};

use super::{AppConfig, Backend};
use crate::IndexingError;
use vector_indexer_pipeline::{
    Components, EmbeddingGenerator, IndexLoader, Orchestrator, RecordTransformer, SearchService,
    SourceReader,
};
use vector_indexer_repository::embedding::{HttpEmbeddingConfig, HttpEmbeddingModel};
use vector_indexer_repository::filesystem::{
    FileSystemObjectStore, JsonLinesAuditStore, JsonLinesSource,
};
use vector_indexer_repository::memory::{
    InMemoryAuditStore, InMemoryObjectStore, InMemorySource, InMemoryVectorIndex,
};
use vector_indexer_repository::opensearch::VectorIndexConfig;
use vector_indexer_repository::{
    AuditStore, EmbeddingModel, ObjectStore, OpenSearchVectorIndex, TabularSource, VectorIndex,
};

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The configured orchestrator.
    pub orchestrator: Orchestrator,
    /// Search over the same index and embedding model.
    pub search: SearchService,
}

impl Dependencies {
    /// Initialize all dependencies from configuration.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(IndexingError)` - If a collaborator cannot be created or is unhealthy
    pub async fn new(config: &AppConfig) -> Result<Self, IndexingError> {
        let model: Arc<dyn EmbeddingModel> = Arc::new(
            HttpEmbeddingModel::new(HttpEmbeddingConfig {
                endpoint: config.embedding_endpoint.endpoint.clone(),
                model: config.embedding_endpoint.model.clone(),
                api_key: config.embedding_endpoint.api_key.clone(),
                timeout: config.embedding_endpoint.timeout,
                ..Default::default()
            })
            .map_err(|e| IndexingError::config(format!("Failed to create embedding client: {}", e)))?,
        );
        Self::with_model(config, model).await
    }

    /// Initialize all dependencies around an already built embedding model.
    pub async fn with_model(
        config: &AppConfig,
        model: Arc<dyn EmbeddingModel>,
    ) -> Result<Self, IndexingError> {
        info!(
            object_store = ?config.object_store,
            audit_log = ?config.audit_log,
            source = ?config.source,
            opensearch_url = ?config.index.opensearch_url,
            index_name = %config.index.index_name,
            dimension = config.index.dimension,
            distance = ?config.index.distance,
            embedding_model = %model.model_name(),
            "Initializing dependencies"
        );

        let store: Arc<dyn ObjectStore> = match &config.object_store {
            Backend::Memory => Arc::new(InMemoryObjectStore::new()),
            Backend::FileSystem(root) => Arc::new(FileSystemObjectStore::new(root)),
        };
        let audit: Arc<dyn AuditStore> = match &config.audit_log {
            Backend::Memory => Arc::new(InMemoryAuditStore::new()),
            Backend::FileSystem(path) => Arc::new(JsonLinesAuditStore::new(path)),
        };
        let source: Arc<dyn TabularSource> = match &config.source {
            Backend::Memory => Arc::new(InMemorySource::new()),
            Backend::FileSystem(root) => Arc::new(JsonLinesSource::new(root)),
        };

        let index: Arc<dyn VectorIndex> = match &config.index.opensearch_url {
            Some(url) => {
                let index_config = VectorIndexConfig {
                    bulk_batch_size: config.index.bulk_batch_size,
                    ..VectorIndexConfig::new(
                        config.index.index_name.clone(),
                        config.index.dimension,
                        config.index.distance,
                    )
                };
                let index = OpenSearchVectorIndex::new(url, index_config, store.clone())
                    .await
                    .map_err(|e| IndexingError::config(format!("Failed to create OpenSearch index: {}", e)))?;

                // Verify OpenSearch is reachable
                let healthy = index
                    .health_check()
                    .await
                    .map_err(|e| IndexingError::config(format!("OpenSearch health check failed: {}", e)))?;
                if !healthy {
                    return Err(IndexingError::config("OpenSearch cluster is unhealthy"));
                }
                info!("OpenSearch connection verified");
                Arc::new(index)
            }
            None => {
                warn!("OPENSEARCH_URL not set, using an in-memory index");
                Arc::new(InMemoryVectorIndex::new(
                    config.index.dimension,
                    config.index.distance,
                    store.clone(),
                ))
            }
        };

        let embedder = Arc::new(EmbeddingGenerator::with_config(
            model,
            config.embedding.clone(),
            config.retry.clone(),
        ));

        let components = Components {
            reader: Arc::new(SourceReader::new(
                source,
                store.clone(),
                config.reader.clone(),
                config.retry.clone(),
            )),
            transformer: Arc::new(RecordTransformer::with_config(config.transformer.clone())),
            embedder: embedder.clone(),
            loader: Arc::new(IndexLoader::with_config(
                index.clone(),
                config.loader.clone(),
                config.retry.clone(),
            )),
            store: store.clone(),
            audit,
            writer: config.writer.clone(),
            retry: config.retry.clone(),
        };
        let orchestrator = Orchestrator::with_config(components, config.orchestrator.clone());
        let search = SearchService::new(
            embedder,
            index,
            store,
            config.search.clone(),
            config.retry.clone(),
        );

        Ok(Self {
            orchestrator,
            search,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vector_indexer_pipeline::SearchRequest;
    use vector_indexer_repository::{EmbeddingTask, ServiceError};
    use vector_indexer_shared::Datapoint;

    struct AxisModel;

    #[async_trait]
    impl EmbeddingModel for AxisModel {
        async fn embed(
            &self,
            texts: &[String],
            _task: EmbeddingTask,
            dimension: usize,
        ) -> Result<Vec<Vec<f32>>, ServiceError> {
            Ok(texts
                .iter()
                .map(|text| (0..dimension).map(|i| if i == text.len() % dimension { 1.0 } else { 0.0 }).collect())
                .collect())
        }

        fn model_name(&self) -> &str {
            "axis"
        }
    }

    fn memory_config() -> AppConfig {
        AppConfig::from_lookup(|name| match name {
            "OBJECT_STORE_ROOT" | "AUDIT_LOG_PATH" | "SOURCE_ROOT" => Some("memory".to_string()),
            "EMBEDDING_DIMENSION" => Some("4".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_memory_wiring_serves_upserts_and_search() {
        let deps = Dependencies::with_model(&memory_config(), Arc::new(AxisModel))
            .await
            .unwrap();

        let datapoint = Datapoint {
            embedding: vec![0.0, 3.0, 0.0, 0.0],
            ..Datapoint::id_only("a")
        };
        let outcome = deps.orchestrator.stream_upsert(vec![datapoint]).await.unwrap();
        assert_eq!(outcome.ingested, vec!["a".to_string()]);

        // "x" embeds onto axis 1.
        let hits = deps.search.search(&SearchRequest::text("x")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }
}
