//! Writer module for the vector indexer pipeline.
//!
//! Packs records into size-bounded newline-delimited JSON shards.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::errors::PipelineError;
use crate::retry::RetryPolicy;
use vector_indexer_repository::shards::parse_lines;
use vector_indexer_repository::{ObjectStore, ObjectUri};

/// What to do when a shard object already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverwritePolicy {
    /// Replace the existing object.
    Overwrite,
    /// Refuse with `Conflict`.
    FailIfExists,
}

impl OverwritePolicy {
    /// Parse the configuration spelling (`OVERWRITE`, `FAIL_IF_EXISTS`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OVERWRITE" => Some(OverwritePolicy::Overwrite),
            "FAIL_IF_EXISTS" => Some(OverwritePolicy::FailIfExists),
            _ => None,
        }
    }
}

/// Configuration for the shard writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum number of records per shard.
    pub max_records: usize,
    /// Maximum serialized size of a shard in bytes.
    pub max_bytes: usize,
    /// Behavior for shards that already exist.
    pub overwrite: OverwritePolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_records: 1000,
            max_bytes: 16 * 1024 * 1024,
            overwrite: OverwritePolicy::Overwrite,
        }
    }
}

/// A shard that was written to the object store.
#[derive(Debug)]
pub struct FlushedShard<T> {
    /// Object the shard was written to.
    pub uri: ObjectUri,
    /// Records of the shard, in write order.
    pub records: Vec<T>,
}

/// Buffers records and writes them as `part-<seq:05>.json` objects under a base prefix.
///
/// A shard is handed to the store in a single put once complete, so readers
/// never observe a partial shard.
pub struct ShardWriter<T> {
    store: Arc<dyn ObjectStore>,
    base: ObjectUri,
    config: WriterConfig,
    retry: RetryPolicy,
    sequence: usize,
    records: Vec<T>,
    buffer: Vec<u8>,
}

impl<T: Serialize> ShardWriter<T> {
    /// Create a writer that names shards under `base`.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        base: ObjectUri,
        config: WriterConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            base,
            config,
            retry,
            sequence: 0,
            records: Vec::new(),
            buffer: Vec::new(),
        }
    }

    /// Prefix the shards are written under.
    pub fn base(&self) -> &ObjectUri {
        &self.base
    }

    /// Add a record, flushing the buffered shard first if the record would
    /// push it over a threshold.
    pub async fn push(&mut self, record: T) -> Result<Option<FlushedShard<T>>, PipelineError> {
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| PipelineError::ValidationFailure(format!("unserializable record: {}", e)))?;
        line.push(b'\n');

        let flushed = if !self.records.is_empty()
            && (self.records.len() + 1 > self.config.max_records
                || self.buffer.len() + line.len() > self.config.max_bytes)
        {
            self.flush().await?
        } else {
            None
        };

        self.records.push(record);
        self.buffer.extend_from_slice(&line);
        Ok(flushed)
    }

    /// Write the buffered records, if any.
    pub async fn finish(&mut self) -> Result<Option<FlushedShard<T>>, PipelineError> {
        self.flush().await
    }

    #[instrument(skip(self), fields(base = %self.base, sequence = self.sequence, records = self.records.len()))]
    async fn flush(&mut self) -> Result<Option<FlushedShard<T>>, PipelineError> {
        if self.records.is_empty() {
            return Ok(None);
        }

        let uri = self.base.join(&format!("part-{:05}.json", self.sequence));
        let overwrite = self.config.overwrite == OverwritePolicy::Overwrite;
        let bytes = std::mem::take(&mut self.buffer);
        let size = bytes.len();

        self.retry
            .run("put_shard", || self.store.put(&uri, bytes.clone(), overwrite))
            .await
            .map_err(|err| PipelineError::storage(err.error))?;

        self.sequence += 1;
        let records = std::mem::take(&mut self.records);
        debug!(uri = %uri, bytes = size, "Shard written");
        Ok(Some(FlushedShard { uri, records }))
    }
}

/// Read back every record of a shard.
pub async fn read_shard<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    uri: &ObjectUri,
) -> Result<Vec<T>, PipelineError> {
    let bytes = store.get(uri).await.map_err(PipelineError::storage)?;
    parse_lines(&bytes).map_err(PipelineError::storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fast_retry;
    use vector_indexer_repository::memory::InMemoryObjectStore;
    use vector_indexer_shared::Datapoint;

    fn base() -> ObjectUri {
        "gs://bucket/batch/run-1/data".parse().unwrap()
    }

    fn writer(store: Arc<InMemoryObjectStore>, config: WriterConfig) -> ShardWriter<Datapoint> {
        ShardWriter::new(store, base(), config, fast_retry())
    }

    #[tokio::test]
    async fn test_flushes_on_record_threshold() {
        let store = Arc::new(InMemoryObjectStore::new());
        let mut writer = writer(
            store.clone(),
            WriterConfig {
                max_records: 2,
                ..Default::default()
            },
        );

        let mut flushed = Vec::new();
        for i in 0..5 {
            flushed.extend(writer.push(Datapoint::id_only(i.to_string())).await.unwrap());
        }
        flushed.extend(writer.finish().await.unwrap());

        let sizes: Vec<usize> = flushed.iter().map(|s| s.records.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(
            flushed[2].uri.to_string(),
            "gs://bucket/batch/run-1/data/part-00002.json"
        );
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order() {
        let store = Arc::new(InMemoryObjectStore::new());
        let mut writer = writer(store.clone(), WriterConfig::default());
        let ids: Vec<String> = (0..20).map(|i| format!("item-{}", 19 - i)).collect();
        for id in &ids {
            assert!(writer.push(Datapoint::id_only(id.clone())).await.unwrap().is_none());
        }
        let shard = writer.finish().await.unwrap().unwrap();

        let back: Vec<Datapoint> = read_shard(store.as_ref(), &shard.uri).await.unwrap();
        let back_ids: Vec<String> = back.into_iter().map(|d| d.id).collect();
        assert_eq!(back_ids, ids);
    }

    #[tokio::test]
    async fn test_flushes_on_byte_threshold() {
        let store = Arc::new(InMemoryObjectStore::new());
        // {"id":"0"}\n is 11 bytes
        let mut writer = writer(
            store.clone(),
            WriterConfig {
                max_bytes: 25,
                ..Default::default()
            },
        );
        for i in 0..5 {
            writer.push(Datapoint::id_only(i.to_string())).await.unwrap();
        }
        writer.finish().await.unwrap();
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_fail_if_exists_reports_conflict() {
        let store = Arc::new(InMemoryObjectStore::new());
        let config = WriterConfig {
            overwrite: OverwritePolicy::FailIfExists,
            ..Default::default()
        };

        let mut first = writer(store.clone(), config.clone());
        first.push(Datapoint::id_only("1")).await.unwrap();
        first.finish().await.unwrap();

        let mut second = writer(store.clone(), config);
        second.push(Datapoint::id_only("1")).await.unwrap();
        assert!(matches!(second.finish().await, Err(PipelineError::Conflict(_))));
    }

    #[test]
    fn test_overwrite_policy_parse() {
        assert_eq!(OverwritePolicy::parse("fail_if_exists"), Some(OverwritePolicy::FailIfExists));
        assert_eq!(OverwritePolicy::parse("keep"), None);
    }
}
