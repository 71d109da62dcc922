//! Reader module for the vector indexer pipeline.
//!
//! Pulls records from the run's datapoint source into bounded batches.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::counters::RunCounters;
use crate::errors::{ErrorCategory, PipelineError};
use crate::retry::RetryPolicy;
use vector_indexer_repository::{ObjectStore, ObjectUri, RowStream, ServiceError, TabularSource};
use vector_indexer_shared::{DatapointSource, RawRecord, Stage};

/// A record as read from the datapoint source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRecord {
    /// A row of a tabular source, still to be validated and embedded.
    Row(RawRecord),
    /// A pre-embedded datapoint, still to be validated.
    Datapoint(Value),
    /// A record the source could not decode.
    Unreadable { payload: Value, message: String },
}

/// Configuration for the source reader.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Records per batch sent downstream.
    pub batch_size: usize,
    /// Consecutive reopen attempts after a transient mid-stream failure.
    pub max_reopens: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_reopens: 3,
        }
    }
}

/// Reader that turns a datapoint source into batches on a channel.
pub struct SourceReader {
    source: Arc<dyn TabularSource>,
    store: Arc<dyn ObjectStore>,
    config: ReaderConfig,
    retry: RetryPolicy,
}

impl SourceReader {
    pub fn new(
        source: Arc<dyn TabularSource>,
        store: Arc<dyn ObjectStore>,
        config: ReaderConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            store,
            config,
            retry,
        }
    }

    /// Read every record of `source` and send it downstream in batches.
    ///
    /// Records are counted as read once the channel has room for their
    /// batch. The cancel flag is
    /// checked between batches. Returns early, without error, if the
    /// receiver goes away.
    ///
    /// # Errors
    ///
    /// Run-scoped failures: a query the source refuses, an empty or
    /// unreadable prefix, or transient failures outliving the retry budget.
    #[instrument(skip_all, fields(source = ?source.describe()))]
    pub async fn pump(
        &self,
        source: &DatapointSource,
        tx: mpsc::Sender<Vec<SourceRecord>>,
        cancel: watch::Receiver<bool>,
        counters: &RunCounters,
    ) -> Result<(), PipelineError> {
        let mut sink = BatchSink {
            tx,
            cancel,
            counters,
            batch: Vec::with_capacity(self.config.batch_size),
            batch_size: self.config.batch_size.max(1),
            sent: 0,
        };

        match source {
            DatapointSource::ByQuery { table, filter } => {
                self.pump_query(table, filter, &mut sink).await?
            }
            DatapointSource::ByGcsPrefix { prefix } => self.pump_prefix(prefix, &mut sink).await?,
            DatapointSource::ByApiPayload { datapoints } => {
                for datapoint in datapoints {
                    let record = match serde_json::to_value(datapoint) {
                        Ok(value) => SourceRecord::Datapoint(value),
                        Err(e) => SourceRecord::Unreadable {
                            payload: Value::String(datapoint.id.clone()),
                            message: e.to_string(),
                        },
                    };
                    if !sink.push(record).await {
                        break;
                    }
                }
            }
        }

        sink.close().await;
        info!(records = sink.sent, "Source exhausted");
        Ok(())
    }

    async fn open(&self, table: &str, filter: &str) -> Result<RowStream, PipelineError> {
        self.retry
            .run("open_query", || self.source.query(table, filter))
            .await
            .map_err(|err| PipelineError::source(err.error))
    }

    async fn pump_query(
        &self,
        table: &str,
        filter: &str,
        sink: &mut BatchSink<'_>,
    ) -> Result<(), PipelineError> {
        let mut rows = self.open(table, filter).await?;
        let mut consumed = 0usize;
        let mut reopens = 0u32;

        while let Some(next) = rows.next().await {
            let record = match next {
                Ok(row) => {
                    reopens = 0;
                    SourceRecord::Row(row)
                }
                Err(e) if e.is_transient() => {
                    reopens += 1;
                    if reopens > self.config.max_reopens {
                        return Err(PipelineError::source(e));
                    }
                    warn!(error = %e, consumed, reopens, "Source stream failed, reopening");
                    tokio::time::sleep(self.retry.delay(ErrorCategory::of(&e), reopens - 1)).await;
                    rows = self.open(table, filter).await?.skip(consumed).boxed();
                    continue;
                }
                Err(e) => unreadable(Value::Null, &e),
            };
            consumed += 1;
            if !sink.push(record).await {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn pump_prefix(&self, prefix: &str, sink: &mut BatchSink<'_>) -> Result<(), PipelineError> {
        let prefix: ObjectUri = prefix
            .parse()
            .map_err(|e: ServiceError| PipelineError::invalid_argument(e.to_string()))?;
        let files = self
            .retry
            .run("list_prefix", || self.store.list(&prefix))
            .await
            .map_err(|err| PipelineError::storage(err.error))?;
        if files.is_empty() {
            return Err(PipelineError::invalid_argument(format!("no files under {}", prefix)));
        }
        debug!(files = files.len(), "Reading datapoint files");

        for file in &files {
            let bytes = self
                .retry
                .run("get_object", || self.store.get(file))
                .await
                .map_err(|err| PipelineError::storage(err.error))?;
            let text = String::from_utf8_lossy(&bytes);

            for line in text.lines().filter(|line| !line.trim().is_empty()) {
                let record = match serde_json::from_str::<Value>(line) {
                    Ok(value) => SourceRecord::Datapoint(value),
                    Err(e) => unreadable(Value::String(line.to_string()), &e.into()),
                };
                if !sink.push(record).await {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

fn unreadable(payload: Value, error: &ServiceError) -> SourceRecord {
    SourceRecord::Unreadable {
        payload,
        message: error.to_string(),
    }
}

struct BatchSink<'a> {
    tx: mpsc::Sender<Vec<SourceRecord>>,
    cancel: watch::Receiver<bool>,
    counters: &'a RunCounters,
    batch: Vec<SourceRecord>,
    batch_size: usize,
    sent: u64,
}

impl BatchSink<'_> {
    /// Buffer a record. Returns `false` once reading should stop.
    async fn push(&mut self, record: SourceRecord) -> bool {
        self.batch.push(record);
        if self.batch.len() >= self.batch_size {
            return self.send().await;
        }
        true
    }

    async fn close(&mut self) {
        if !self.batch.is_empty() {
            self.send().await;
        }
    }

    async fn send(&mut self) -> bool {
        if *self.cancel.borrow() {
            self.batch.clear();
            return false;
        }
        let Ok(permit) = self.tx.reserve().await else {
            self.batch.clear();
            return false;
        };
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        let count = batch.len() as u64;
        // Counted before the batch becomes visible to workers.
        self.counters.add(Stage::Read, count);
        permit.send(batch);
        self.sent += count;
        !*self.cancel.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fast_retry;
    use async_trait::async_trait;
    use futures::stream;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vector_indexer_repository::memory::{InMemoryObjectStore, InMemorySource};
    use vector_indexer_shared::Datapoint;

    fn rows(n: usize) -> Vec<RawRecord> {
        (0..n)
            .map(|i| json!({"id": i, "title": format!("row {}", i)}).as_object().cloned().unwrap())
            .collect()
    }

    /// Source whose first stream fails transiently after `fail_after` rows.
    struct FlakySource {
        rows: Vec<RawRecord>,
        fail_after: usize,
        opens: AtomicUsize,
    }

    #[async_trait]
    impl TabularSource for FlakySource {
        async fn query(&self, _table: &str, _filter: &str) -> Result<RowStream, ServiceError> {
            let first = self.opens.fetch_add(1, Ordering::SeqCst) == 0;
            let mut items: Vec<Result<RawRecord, ServiceError>> =
                self.rows.iter().cloned().map(Ok).collect();
            if first {
                items.truncate(self.fail_after);
                items.push(Err(ServiceError::unavailable("connection reset")));
            }
            Ok(stream::iter(items).boxed())
        }
    }

    async fn collect(
        reader: &SourceReader,
        source: DatapointSource,
    ) -> (Result<(), PipelineError>, Vec<SourceRecord>, RunCounters) {
        let (tx, mut rx) = mpsc::channel(100);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let counters = RunCounters::new();
        let result = reader.pump(&source, tx, cancel_rx, &counters).await;
        let mut records = Vec::new();
        while let Some(batch) = rx.recv().await {
            records.extend(batch);
        }
        (result, records, counters)
    }

    fn reader(source: Arc<dyn TabularSource>, store: Arc<dyn ObjectStore>) -> SourceReader {
        SourceReader::new(
            source,
            store,
            ReaderConfig {
                batch_size: 4,
                max_reopens: 2,
            },
            fast_retry(),
        )
    }

    #[tokio::test]
    async fn test_query_batches_and_counts() {
        let source = Arc::new(InMemorySource::new());
        source.insert_rows("courses", rows(10)).await;
        let reader = reader(source, Arc::new(InMemoryObjectStore::new()));

        let (result, records, counters) = collect(
            &reader,
            DatapointSource::ByQuery {
                table: "courses".to_string(),
                filter: "id >= 3".to_string(),
            },
        )
        .await;

        result.unwrap();
        assert_eq!(records.len(), 7);
        assert_eq!(counters.snapshot().read, 7);
    }

    #[tokio::test]
    async fn test_transient_stream_failure_resumes_without_duplicates() {
        let source = Arc::new(FlakySource {
            rows: rows(9),
            fail_after: 5,
            opens: AtomicUsize::new(0),
        });
        let reader = reader(source.clone(), Arc::new(InMemoryObjectStore::new()));

        let (result, records, _) = collect(
            &reader,
            DatapointSource::ByQuery {
                table: "t".to_string(),
                filter: String::new(),
            },
        )
        .await;

        result.unwrap();
        let ids: Vec<Value> = records
            .iter()
            .map(|r| match r {
                SourceRecord::Row(row) => row["id"].clone(),
                other => panic!("unexpected record {:?}", other),
            })
            .collect();
        assert_eq!(ids, (0..9).map(|i| json!(i)).collect::<Vec<_>>());
        assert_eq!(source.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refused_batches_are_not_counted() {
        let source = Arc::new(InMemorySource::new());
        source.insert_rows("courses", rows(10)).await;
        let reader = reader(source, Arc::new(InMemoryObjectStore::new()));

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let counters = RunCounters::new();
        let source = DatapointSource::ByQuery {
            table: "courses".to_string(),
            filter: String::new(),
        };
        reader.pump(&source, tx, cancel_rx, &counters).await.unwrap();
        assert_eq!(counters.snapshot().read, 0);
    }

    #[tokio::test]
    async fn test_invalid_query_is_fatal() {
        let source = Arc::new(InMemorySource::new());
        source.insert_rows("courses", rows(1)).await;
        let reader = reader(source, Arc::new(InMemoryObjectStore::new()));

        let (result, _, _) = collect(
            &reader,
            DatapointSource::ByQuery {
                table: "courses".to_string(),
                filter: "level ==".to_string(),
            },
        )
        .await;
        assert!(matches!(result, Err(PipelineError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_prefix_reads_lines_and_flags_bad_json() {
        let store = Arc::new(InMemoryObjectStore::new());
        let uri: ObjectUri = "gs://bucket/in/part-0.json".parse().unwrap();
        store
            .put(&uri, b"{\"id\":\"1\",\"embedding\":[1.0]}\n\nnot json\n".to_vec(), true)
            .await
            .unwrap();
        let reader = reader(Arc::new(InMemorySource::new()), store);

        let (result, records, _) = collect(
            &reader,
            DatapointSource::ByGcsPrefix {
                prefix: "gs://bucket/in".to_string(),
            },
        )
        .await;

        result.unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], SourceRecord::Datapoint(_)));
        assert!(matches!(records[1], SourceRecord::Unreadable { .. }));
    }

    #[tokio::test]
    async fn test_empty_prefix_is_invalid_argument() {
        let reader = reader(Arc::new(InMemorySource::new()), Arc::new(InMemoryObjectStore::new()));
        let (result, _, _) = collect(
            &reader,
            DatapointSource::ByGcsPrefix {
                prefix: "gs://bucket/nothing".to_string(),
            },
        )
        .await;
        assert!(matches!(result, Err(PipelineError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_cancel_stops_between_batches() {
        let reader = reader(Arc::new(InMemorySource::new()), Arc::new(InMemoryObjectStore::new()));

        let (tx, mut rx) = mpsc::channel(100);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();
        let counters = RunCounters::new();
        reader
            .pump(
                &DatapointSource::ByApiPayload {
                    datapoints: vec![Datapoint::id_only("1")],
                },
                tx,
                cancel_rx,
                &counters,
            )
            .await
            .unwrap();
        assert!(rx.recv().await.is_none());
        assert_eq!(counters.snapshot().read, 0);
    }
}
