//! Typed configuration read from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::IndexingError;
use vector_indexer_pipeline::{
    EmbeddingConfig, LoaderConfig, NormalizationPolicy, OrchestratorConfig, OverwritePolicy,
    ReaderConfig, RetryPolicy, RunIdPolicy, SearchConfig, SparseConfig, TransformerConfig,
    WriterConfig,
};
use vector_indexer_shared::DistanceMeasure;

/// Value selecting the in-memory backend for a storage setting.
pub const MEMORY_BACKEND: &str = "memory";

/// Default root directory of the filesystem object store.
const DEFAULT_OBJECT_STORE_ROOT: &str = "./data/objects";

/// Default path of the JSON-lines audit log.
const DEFAULT_AUDIT_LOG_PATH: &str = "./data/audit.jsonl";

/// Default directory holding `<table>.jsonl` source tables.
const DEFAULT_SOURCE_ROOT: &str = "./data/tables";

/// Default OpenSearch index name.
const DEFAULT_INDEX_NAME: &str = "vectors";

/// Default embedding model.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-005";

/// Default embedding endpoint (OpenAI-compatible).
const DEFAULT_EMBEDDING_ENDPOINT: &str = "http://localhost:8080/v1";

/// Where a storage concern lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    FileSystem(PathBuf),
}

impl Backend {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case(MEMORY_BACKEND) {
            Backend::Memory
        } else {
            Backend::FileSystem(PathBuf::from(value))
        }
    }
}

/// Connection settings for the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSettings {
    /// OpenSearch URL; the in-memory index is used when unset.
    pub opensearch_url: Option<String>,
    pub index_name: String,
    pub dimension: usize,
    pub distance: DistanceMeasure,
    /// Documents per `_bulk` request.
    pub bulk_batch_size: usize,
}

/// Connection settings for the embedding endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Complete configuration of the indexer.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub object_store: Backend,
    pub audit_log: Backend,
    pub source: Backend,
    pub index: IndexSettings,
    pub embedding_endpoint: EmbeddingSettings,
    pub embedding: EmbeddingConfig,
    pub transformer: TransformerConfig,
    pub reader: ReaderConfig,
    pub writer: WriterConfig,
    pub loader: LoaderConfig,
    pub orchestrator: OrchestratorConfig,
    pub search: SearchConfig,
    pub retry: RetryPolicy,
}

impl AppConfig {
    /// Read the configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `OBJECT_STORE_ROOT`, `AUDIT_LOG_PATH`, `SOURCE_ROOT`: paths, or `memory`
    /// - `OPENSEARCH_URL`, `INDEX_NAME`, `INDEX_BULK_BATCH_SIZE`
    /// - `EMBEDDING_ENDPOINT`, `EMBEDDING_MODEL`, `EMBEDDING_API_KEY`, `EMBEDDING_DIMENSION`,
    ///   `EMBEDDING_BATCH_SIZE`, `EMBEDDING_TIMEOUT_SECS`
    /// - `DISTANCE_MEASURE`, `NORMALIZATION`
    /// - `HYBRID_DEFAULT`, `SPARSE_DIMENSION`, `BM25_K1`, `BM25_B`, `BM25_AVG_DOC_LEN`
    /// - `RUN_ID_POLICY`, `WORKERS`, `CHANNEL_BUFFER_SIZE`, `STREAMING_THRESHOLD`, `RESUME`,
    ///   `RUN_LEASE_SECS`
    /// - `READ_BATCH_SIZE`, `MAX_REOPENS`, `INGEST_BATCH_SIZE`
    /// - `SHARD_MAX_RECORDS`, `SHARD_MAX_BYTES`, `SHARD_OVERWRITE`
    /// - `RETRY_MAX_ATTEMPTS`, `RETRY_INITIAL_DELAY_MS`, `RETRY_MAX_DELAY_MS`, `RETRY_JITTER`,
    ///   `CALL_TIMEOUT_SECS`
    /// - `ID_FIELD`, `TEXT_FIELDS`, `METADATA_FIELDS`, `RESTRICTS_FIELDS`,
    ///   `NUMERIC_RESTRICTS_FIELDS`, `TIMESTAMP_FIELDS`, `NAMESPACE`, `CROWDING_TAG_FIELD`,
    ///   `MAX_PAYLOAD_BYTES`
    /// - `SEARCH_TOP_K`, `METADATA_PREFIX`
    pub fn from_env() -> Result<Self, IndexingError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`; unset and blank values take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String> + 'static) -> Result<Self, IndexingError> {
        let env = Env(Box::new(lookup));

        let distance = env.parse_with("DISTANCE_MEASURE", DistanceMeasure::DotProduct, DistanceMeasure::parse)?;
        let normalization = env.parse_with(
            "NORMALIZATION",
            NormalizationPolicy::for_distance(distance),
            NormalizationPolicy::parse,
        )?;
        let dimension = env.parse("EMBEDDING_DIMENSION", 768usize)?;
        if dimension == 0 {
            return Err(IndexingError::config("EMBEDDING_DIMENSION must be positive"));
        }

        let sparse_defaults = SparseConfig::default();
        let sparse = SparseConfig {
            dimension: env.parse("SPARSE_DIMENSION", sparse_defaults.dimension)?,
            k1: env.parse("BM25_K1", sparse_defaults.k1)?,
            b: env.parse("BM25_B", sparse_defaults.b)?,
            avg_doc_len: env.parse("BM25_AVG_DOC_LEN", sparse_defaults.avg_doc_len)?,
        };
        let hybrid_default = env.parse("HYBRID_DEFAULT", false)?;

        let embedding = EmbeddingConfig {
            batch_size: env.parse("EMBEDDING_BATCH_SIZE", 64usize)?,
            dimension,
            normalization,
            sparse,
        };

        let transformer_defaults = TransformerConfig::default();
        let transformer = TransformerConfig {
            id_field: env.parse("ID_FIELD", transformer_defaults.id_field)?,
            text_fields: env.list("TEXT_FIELDS", transformer_defaults.text_fields),
            metadata_fields: env.list("METADATA_FIELDS", transformer_defaults.metadata_fields),
            restricts_fields: env.list("RESTRICTS_FIELDS", transformer_defaults.restricts_fields),
            numeric_restricts_fields: env.list(
                "NUMERIC_RESTRICTS_FIELDS",
                transformer_defaults.numeric_restricts_fields,
            ),
            timestamp_fields: env.list("TIMESTAMP_FIELDS", transformer_defaults.timestamp_fields),
            namespace: env.get("NAMESPACE"),
            crowding_tag_field: env.get("CROWDING_TAG_FIELD"),
            max_payload_bytes: env.parse("MAX_PAYLOAD_BYTES", transformer_defaults.max_payload_bytes)?,
        };

        let reader_defaults = ReaderConfig::default();
        let reader = ReaderConfig {
            batch_size: env.parse("READ_BATCH_SIZE", reader_defaults.batch_size)?,
            max_reopens: env.parse("MAX_REOPENS", reader_defaults.max_reopens)?,
        };

        let writer_defaults = WriterConfig::default();
        let writer = WriterConfig {
            max_records: env.parse("SHARD_MAX_RECORDS", writer_defaults.max_records)?,
            max_bytes: env.parse("SHARD_MAX_BYTES", writer_defaults.max_bytes)?,
            overwrite: env.parse_with("SHARD_OVERWRITE", writer_defaults.overwrite, OverwritePolicy::parse)?,
        };

        let loader = LoaderConfig {
            batch_size: env.parse("INGEST_BATCH_SIZE", LoaderConfig::default().batch_size)?,
        };

        let orchestrator_defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            run_id_policy: env.parse_with(
                "RUN_ID_POLICY",
                orchestrator_defaults.run_id_policy,
                RunIdPolicy::parse,
            )?,
            hybrid_default,
            workers: env.parse("WORKERS", orchestrator_defaults.workers)?,
            channel_buffer_size: env.parse("CHANNEL_BUFFER_SIZE", orchestrator_defaults.channel_buffer_size)?,
            streaming_threshold: env.parse("STREAMING_THRESHOLD", orchestrator_defaults.streaming_threshold)?,
            resume: env.parse("RESUME", orchestrator_defaults.resume)?,
            lease: Duration::from_secs(env.parse("RUN_LEASE_SECS", orchestrator_defaults.lease.as_secs())?),
        };

        let search = SearchConfig {
            default_top_k: env.parse("SEARCH_TOP_K", SearchConfig::default().default_top_k)?,
            hybrid_default,
            metadata_prefix: env.get("METADATA_PREFIX"),
        };

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: env.parse("RETRY_MAX_ATTEMPTS", retry_defaults.max_attempts)?,
            initial_delay_ms: env.parse("RETRY_INITIAL_DELAY_MS", retry_defaults.initial_delay_ms)?,
            max_delay_ms: env.parse("RETRY_MAX_DELAY_MS", retry_defaults.max_delay_ms)?,
            jitter: env.parse("RETRY_JITTER", retry_defaults.jitter)?,
            call_timeout: Duration::from_secs(
                env.parse("CALL_TIMEOUT_SECS", retry_defaults.call_timeout.as_secs())?,
            ),
        };

        let index = IndexSettings {
            opensearch_url: env.get("OPENSEARCH_URL"),
            index_name: env.parse("INDEX_NAME", DEFAULT_INDEX_NAME.to_string())?,
            dimension,
            distance,
            bulk_batch_size: env.parse("INDEX_BULK_BATCH_SIZE", 500usize)?,
        };

        let embedding_endpoint = EmbeddingSettings {
            endpoint: env.parse("EMBEDDING_ENDPOINT", DEFAULT_EMBEDDING_ENDPOINT.to_string())?,
            model: env.parse("EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL.to_string())?,
            api_key: env.get("EMBEDDING_API_KEY"),
            timeout: Duration::from_secs(env.parse("EMBEDDING_TIMEOUT_SECS", 30u64)?),
        };

        Ok(Self {
            object_store: Backend::parse(&env.parse("OBJECT_STORE_ROOT", DEFAULT_OBJECT_STORE_ROOT.to_string())?),
            audit_log: Backend::parse(&env.parse("AUDIT_LOG_PATH", DEFAULT_AUDIT_LOG_PATH.to_string())?),
            source: Backend::parse(&env.parse("SOURCE_ROOT", DEFAULT_SOURCE_ROOT.to_string())?),
            index,
            embedding_endpoint,
            embedding,
            transformer,
            reader,
            writer,
            loader,
            orchestrator,
            search,
            retry,
        })
    }
}

struct Env(Box<dyn Fn(&str) -> Option<String>>);

impl Env {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str, default: T) -> Result<T, IndexingError> {
        self.parse_with(name, default, |value| value.parse().ok())
    }

    fn parse_with<T>(
        &self,
        name: &str,
        default: T,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, IndexingError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => parse(&value)
                .ok_or_else(|| IndexingError::config(format!("invalid value for {}: '{}'", name, value))),
        }
    }

    /// Comma separated list.
    fn list(&self, name: &str, default: Vec<String>) -> Vec<String> {
        match self.get(name) {
            None => default,
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|field| !field.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, IndexingError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(move |name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.object_store, Backend::FileSystem(PathBuf::from("./data/objects")));
        assert_eq!(config.index.opensearch_url, None);
        assert_eq!(config.index.distance, DistanceMeasure::DotProduct);
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.embedding.normalization, NormalizationPolicy::UnitL2);
        assert_eq!(config.orchestrator.run_id_policy, RunIdPolicy::Generated);
        assert_eq!(config.transformer.text_fields, vec!["title".to_string()]);
        assert!(!config.orchestrator.hybrid_default);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("OBJECT_STORE_ROOT", "memory"),
            ("DISTANCE_MEASURE", "squared_l2"),
            ("EMBEDDING_DIMENSION", "256"),
            ("HYBRID_DEFAULT", "true"),
            ("TEXT_FIELDS", "title, description ,"),
            ("RUN_ID_POLICY", "CALLER_SUPPLIED"),
            ("SHARD_OVERWRITE", "FAIL_IF_EXISTS"),
            ("NAMESPACE", "  "),
            ("CALL_TIMEOUT_SECS", "5"),
            ("RUN_LEASE_SECS", "90"),
        ])
        .unwrap();
        assert_eq!(config.object_store, Backend::Memory);
        assert_eq!(config.index.dimension, 256);
        assert_eq!(config.embedding.normalization, NormalizationPolicy::None);
        assert!(config.orchestrator.hybrid_default);
        assert!(config.search.hybrid_default);
        assert_eq!(
            config.transformer.text_fields,
            vec!["title".to_string(), "description".to_string()]
        );
        assert_eq!(config.orchestrator.run_id_policy, RunIdPolicy::CallerSupplied);
        assert_eq!(config.writer.overwrite, OverwritePolicy::FailIfExists);
        assert_eq!(config.transformer.namespace, None);
        assert_eq!(config.retry.call_timeout, Duration::from_secs(5));
        assert_eq!(config.orchestrator.lease, Duration::from_secs(90));
    }

    #[test]
    fn test_invalid_values() {
        for vars in [
            [("WORKERS", "many")],
            [("DISTANCE_MEASURE", "manhattan")],
            [("EMBEDDING_DIMENSION", "0")],
            [("RESUME", "yes please")],
        ] {
            assert!(matches!(config(&vars), Err(IndexingError::ConfigError(_))));
        }
    }
}
