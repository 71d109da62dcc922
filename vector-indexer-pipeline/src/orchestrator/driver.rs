//! Run driver: the supervisor task behind a single run.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, instrument, warn};

use super::{Inner, RunHandle, RunPlan};
use crate::counters::RunCounters;
use crate::embedding::EmbeddingGenerator;
use crate::errors::PipelineError;
use crate::loader::{IndexLoader, IngestOutcome};
use crate::reader::SourceRecord;
use crate::transformer::RecordTransformer;
use crate::writer::{FlushedShard, ShardWriter};
use vector_indexer_repository::AuditStore;
use vector_indexer_shared::{
    Datapoint, IngestionPath, Item, RejectReason, RejectRecord, RejectSummary, RunStatus,
    Stage, UpdateMode, WatermarkKey,
};

/// Output of one transformed and embedded source batch.
#[derive(Default)]
struct BatchOutput {
    datapoints: Vec<Datapoint>,
    rejects: Vec<RejectRecord>,
}

/// Read-only state shared by the workers of a run.
struct Workers {
    transformer: Arc<RecordTransformer>,
    embedder: Arc<EmbeddingGenerator>,
    counters: Arc<RunCounters>,
    cancel: watch::Receiver<bool>,
    skip: HashSet<String>,
    mode: UpdateMode,
    hybrid: bool,
}

impl Workers {
    fn skipped(&self, id: &str) -> bool {
        self.skip.contains(id)
    }

    /// Validate and embed one source batch.
    async fn process(&self, batch: Vec<SourceRecord>) -> Result<BatchOutput, PipelineError> {
        let mut output = BatchOutput::default();
        if *self.cancel.borrow() {
            return Ok(output);
        }

        let mut skipped = 0u64;
        let mut items: Vec<Item> = Vec::new();
        let mut payloads: Vec<Value> = Vec::new();

        for record in batch {
            match record {
                SourceRecord::Row(row) => {
                    let outcome = if self.mode == UpdateMode::Delete {
                        self.transformer.identify(&row).map(|id| Item::new(id, ""))
                    } else {
                        self.transformer.transform(&row)
                    };
                    match outcome {
                        Ok(item) if self.skipped(&item.id) => skipped += 1,
                        Ok(item) if self.mode == UpdateMode::Delete => {
                            output.datapoints.push(Datapoint::id_only(item.id))
                        }
                        Ok(item) => {
                            items.push(item);
                            payloads.push(Value::Object(row));
                        }
                        Err(reason) => {
                            let id = self.transformer.identify(&row).ok();
                            output.rejects.push(RejectRecord::new(
                                id,
                                Stage::Validate,
                                reason,
                                Value::Object(row),
                            ));
                        }
                    }
                }
                SourceRecord::Datapoint(value) => {
                    match self.transformer.validate_datapoint(value.clone()) {
                        Ok(datapoint) if self.skipped(&datapoint.id) => skipped += 1,
                        Ok(datapoint) if self.mode == UpdateMode::Delete => {
                            output.datapoints.push(Datapoint::id_only(datapoint.id))
                        }
                        Ok(datapoint) => match self.embedder.prepare_preembedded(datapoint) {
                            Ok(datapoint) => output.datapoints.push(datapoint),
                            Err((datapoint, reason)) => output.rejects.push(RejectRecord::new(
                                Some(datapoint.id),
                                Stage::Embed,
                                reason,
                                value,
                            )),
                        },
                        Err((id, reason)) => output.rejects.push(RejectRecord::new(
                            id,
                            Stage::Validate,
                            reason,
                            value,
                        )),
                    }
                }
                SourceRecord::Unreadable { payload, message } => output.rejects.push(
                    RejectRecord::new(None, Stage::Read, RejectReason::Malformed { message }, payload),
                ),
            }
        }

        if !items.is_empty() {
            let outcomes = self.embedder.embed_items(items, self.hybrid).await?;
            for (outcome, payload) in outcomes.into_iter().zip(payloads) {
                match outcome {
                    Ok(datapoint) => output.datapoints.push(datapoint),
                    Err((item, reason)) => output.rejects.push(RejectRecord::new(
                        Some(item.id),
                        Stage::Embed,
                        reason,
                        payload,
                    )),
                }
            }
        }

        self.counters.add(Stage::Embed, output.datapoints.len() as u64);
        self.counters.add_skipped(skipped);
        Ok(output)
    }
}

/// The single writer side of a run: shards, rejects and streaming ingestion.
struct Sink {
    watermark: WatermarkKey,
    inner: Arc<Inner>,
    handle: Arc<RunHandle>,
    data: ShardWriter<Datapoint>,
    rejects: ShardWriter<RejectRecord>,
    summary: RejectSummary,
    mode: UpdateMode,
    ingestion: IngestionPath,
    resume: bool,
    written_ids: Vec<String>,
}

impl Sink {
    fn loader(&self) -> &IndexLoader {
        &self.inner.components.loader
    }

    fn audit(&self) -> &dyn AuditStore {
        self.inner.components.audit.as_ref()
    }

    async fn accept(&mut self, output: BatchOutput) -> Result<(), PipelineError> {
        self.advance(Stage::Validate).await;
        if !output.datapoints.is_empty() {
            self.advance(Stage::Embed).await;
        }
        for datapoint in output.datapoints {
            if let Some(shard) = self.data.push(datapoint).await? {
                self.on_data_shard(shard, true).await?;
            }
        }
        for reject in output.rejects {
            self.reject(reject).await?;
        }
        Ok(())
    }

    async fn reject(&mut self, reject: RejectRecord) -> Result<(), PipelineError> {
        debug!(item_id = ?reject.item_id, stage = %reject.stage, reason = %reject.reason, "Record rejected");
        self.summary.record(reject.stage, &reject.reason);
        self.rejects.push(reject).await?;
        Ok(())
    }

    async fn on_data_shard(
        &mut self,
        shard: FlushedShard<Datapoint>,
        ingest: bool,
    ) -> Result<(), PipelineError> {
        self.handle
            .counters
            .add(Stage::Write, shard.records.len() as u64);
        let uri = shard.uri.to_string();
        let run = self
            .handle
            .update(|run| {
                run.shards.push(uri);
                run.stage = run.stage.max(Some(Stage::Write));
            })
            .await;
        debug!(run_id = %run.run_id, shard = %shard.uri, records = shard.records.len(), "Data shard written");

        if !ingest {
            return Ok(());
        }
        if self.ingestion == IngestionPath::Batch {
            if self.resume {
                self.written_ids.extend(shard.records.iter().map(|d| d.id.clone()));
            }
            return Ok(());
        }

        self.advance(Stage::Ingest).await;
        let outcome = match self.mode {
            UpdateMode::Delete => {
                let ids: Vec<String> = shard.records.iter().map(|d| d.id.clone()).collect();
                self.loader().remove(&ids).await?
            }
            _ => self.loader().upsert(&shard.records).await?,
        };
        self.on_ingested(&shard.records, outcome).await
    }

    async fn on_ingested(
        &mut self,
        records: &[Datapoint],
        outcome: IngestOutcome,
    ) -> Result<(), PipelineError> {
        self.handle
            .counters
            .add(Stage::Ingest, outcome.ingested.len() as u64);
        if self.resume && !outcome.ingested.is_empty() {
            self.save_watermark(&outcome.ingested).await?;
        }

        for (id, reason) in outcome.rejected {
            let payload = records
                .iter()
                .find(|d| d.id == id)
                .and_then(|d| serde_json::to_value(d).ok())
                .unwrap_or(Value::Null);
            self.reject(RejectRecord::new(Some(id), Stage::Ingest, reason, payload))
                .await?;
        }
        Ok(())
    }

    async fn save_watermark(&self, ids: &[String]) -> Result<(), PipelineError> {
        self.inner
            .components
            .retry
            .run("save_watermark", || self.audit().save_watermark(&self.watermark, ids))
            .await
            .map_err(|err| PipelineError::storage(err.error))
    }

    /// Move the run forward to `stage`, recording the change when it is one.
    async fn advance(&self, stage: Stage) {
        let reached = self
            .inner
            .progress(&self.handle, |run| {
                let changed = run.stage < Some(stage);
                run.stage = run.stage.max(Some(stage));
                changed
            })
            .await;
        if let Some(run) = reached {
            info!(run_id = %run.run_id, stage = %stage, "Run stage reached");
        }
    }

    /// Flush the remaining shards and, for batch runs, hand the prefix to the index.
    async fn finish(&mut self, ingest: bool) -> Result<(), PipelineError> {
        if let Some(shard) = self.data.finish().await? {
            self.on_data_shard(shard, ingest).await?;
        }
        self.rejects.finish().await?;

        let written = self.handle.counters.snapshot().written;
        if !ingest || self.ingestion != IngestionPath::Batch || written == 0 {
            return Ok(());
        }

        self.advance(Stage::Ingest).await;
        let contents_uri = self.data.base().to_string();
        self.loader()
            .batch_update(&contents_uri, self.mode == UpdateMode::Overwrite)
            .await?;
        self.handle.counters.add(Stage::Ingest, written);
        if self.resume && !self.written_ids.is_empty() {
            let ids = std::mem::take(&mut self.written_ids);
            self.save_watermark(&ids).await?;
        }
        Ok(())
    }
}

/// Drive a run from `QUEUED` to a terminal state.
#[instrument(skip_all, fields(run_id = %plan.run_id))]
pub(super) async fn drive(inner: Arc<Inner>, handle: Arc<RunHandle>, plan: RunPlan) {
    let started = inner
        .progress(&handle, |run| {
            let now = Utc::now();
            run.status = RunStatus::Running;
            run.stage = Some(Stage::Read);
            run.started_at = Some(now);
            run.heartbeat_at = Some(now);
            true
        })
        .await;
    if let Some(run) = started {
        info!(source = ?run.source, output = %run.output_prefix, "Run started");
    }
    tokio::spawn(keep_lease(inner.clone(), handle.clone()));

    let (rejects, result) = execute(&inner, &handle, &plan).await;
    let cancelled = *handle.cancel_tx.borrow();
    let superseded = handle.superseded.load(Ordering::SeqCst);
    let counts = handle.counters.snapshot();

    let (run, recorded) = inner
        .settle(&handle, |run| {
            run.ended_at = Some(Utc::now());
            match &result {
                Err(e) => {
                    run.status = RunStatus::Failed;
                    run.error = Some(e.to_string());
                }
                Ok(_) if superseded => {
                    run.status = RunStatus::Cancelled;
                    run.error = Some("run record closed by another process".to_string());
                }
                Ok(_) if cancelled => run.status = RunStatus::Cancelled,
                Ok(_) if counts.read > counts.skipped && counts.written == 0 => {
                    run.status = RunStatus::Failed;
                    run.error = Some("all records rejected".to_string());
                }
                Ok(_) => run.status = RunStatus::Succeeded,
            }
            run.rejects = rejects;
        })
        .await;

    match run.status {
        RunStatus::Failed => error!(error = ?run.error, counts = ?run.counts, "Run failed"),
        status => info!(status = ?status, counts = ?run.counts, rejects = run.rejects.total, "Run finished"),
    }
    if recorded {
        inner.evict(&plan.run_id, &handle).await;
    } else {
        error!(status = ?run.status, "Terminal run state not recorded, keeping run in memory");
    }
    handle.done_tx.send_replace(Some(recorded));
}

/// Renew the lease of a live run and pick up cancellation requested through
/// the audit store, until the run is over.
async fn keep_lease(inner: Arc<Inner>, handle: Arc<RunHandle>) {
    let interval = (inner.config.lease / 3).max(Duration::from_millis(1));
    let mut done = handle.done_tx.subscribe();

    loop {
        if done.borrow().is_some() {
            return;
        }
        tokio::select! {
            _ = done.changed() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let local = handle.snapshot().await;
        let requested = match inner.components.audit.latest(&local.run_id).await {
            Ok(latest) => latest.is_some_and(|latest| latest.same_attempt(&local) && latest.cancel_requested),
            Err(err) => {
                warn!(run_id = %local.run_id, error = %err, "Failed to read run record");
                false
            }
        };

        let renewed = inner
            .progress(&handle, |run| {
                run.cancel_requested |= requested;
                run.heartbeat_at = Some(Utc::now());
                true
            })
            .await;
        if requested && !*handle.cancel_tx.borrow() {
            info!(run_id = %local.run_id, "Cancellation requested through the audit store");
            handle.cancel_tx.send_replace(true);
        }
        debug!(run_id = %local.run_id, renewed = renewed.is_some(), "Run lease renewed");
    }
}

/// Run the pipeline. Returns the reject summary even when the run fails.
async fn execute(
    inner: &Arc<Inner>,
    handle: &Arc<RunHandle>,
    plan: &RunPlan,
) -> (RejectSummary, Result<(), PipelineError>) {
    let components = &inner.components;
    let (tx, rx) = mpsc::channel(inner.config.channel_buffer_size.max(1));

    let reader_task = {
        let reader = components.reader.clone();
        let counters = handle.counters.clone();
        let cancel = handle.cancel_tx.subscribe();
        let source = plan.source.clone();
        tokio::spawn(async move { reader.pump(&source, tx, cancel, &counters).await })
    };

    let workers = Arc::new(Workers {
        transformer: components.transformer.clone(),
        embedder: components.embedder.clone(),
        counters: handle.counters.clone(),
        cancel: handle.cancel_tx.subscribe(),
        skip: plan.skip.clone(),
        mode: plan.mode,
        hybrid: plan.hybrid,
    });

    let reject_base = plan.output.join("rejects");
    let mut sink = Sink {
        watermark: WatermarkKey {
            run_id: plan.run_id.clone(),
            mode: plan.mode,
            source: plan.source.describe(),
        },
        inner: inner.clone(),
        handle: handle.clone(),
        data: ShardWriter::new(
            components.store.clone(),
            plan.output.join("data"),
            components.writer.clone(),
            components.retry.clone(),
        ),
        rejects: ShardWriter::new(
            components.store.clone(),
            reject_base.clone(),
            components.writer.clone(),
            components.retry.clone(),
        ),
        summary: RejectSummary::default(),
        mode: plan.mode,
        ingestion: plan.ingestion,
        resume: inner.config.resume,
        written_ids: Vec::new(),
    };

    let mut outputs = ReceiverStream::new(rx)
        .map(|batch| {
            let workers = workers.clone();
            async move { workers.process(batch).await }
        })
        .buffer_unordered(inner.config.workers.max(1));

    let mut failure = None;
    while let Some(output) = outputs.next().await {
        match output {
            Ok(output) => {
                if let Err(e) = sink.accept(output).await {
                    failure = Some(e);
                    break;
                }
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    drop(outputs);

    let read_result = match reader_task.await {
        Ok(result) => result,
        Err(e) => Err(PipelineError::SourceUnavailable(format!("reader task failed: {}", e))),
    };
    let failure = failure.or(read_result.err());

    let result = match failure {
        Some(e) => {
            // Keep what was already produced or diverted.
            if let Err(flush_error) = sink.finish(false).await {
                warn!(error = %flush_error, "Failed to flush shards of failed run");
            }
            Err(e)
        }
        None => {
            let cancelled = *handle.cancel_tx.borrow();
            sink.finish(!cancelled).await
        }
    };

    let mut summary = std::mem::take(&mut sink.summary);
    if summary.total > 0 {
        summary.location = Some(reject_base.to_string());
    }
    (summary, result)
}
