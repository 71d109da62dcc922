//! Orchestrator module for the vector indexer pipeline.
//!
//! Coordinates the reader, transformer, embedding generator, shard writer and
//! loader into runs, and tracks run state in the audit store.

mod driver;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::counters::RunCounters;
use crate::embedding::EmbeddingGenerator;
use crate::errors::{ErrorCategory, PipelineError};
use crate::loader::{IndexLoader, IngestOutcome};
use crate::reader::SourceReader;
use crate::retry::RetryPolicy;
use crate::transformer::RecordTransformer;
use crate::writer::WriterConfig;
use vector_indexer_repository::{AuditStore, ObjectStore, ObjectUri, ServiceError};
use vector_indexer_shared::{
    Datapoint, DatapointSource, IngestionPath, RejectReason, RejectSummary, Run, RunCounts,
    RunRequest, RunStatus, UpdateMode, WatermarkKey,
};

/// Rounds of retries spent on recording the terminal state of a run.
const TERMINAL_APPEND_ROUNDS: u32 = 3;

/// How run identifiers are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunIdPolicy {
    /// The caller must supply the run id.
    CallerSupplied,
    /// Use the caller's run id when given, otherwise generate one.
    Generated,
}

impl RunIdPolicy {
    /// Parse the configuration spelling (`CALLER_SUPPLIED`, `GENERATED`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CALLER_SUPPLIED" | "CALLER" => Some(RunIdPolicy::CallerSupplied),
            "GENERATED" | "GENERATE" => Some(RunIdPolicy::Generated),
            _ => None,
        }
    }
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How run ids are assigned.
    pub run_id_policy: RunIdPolicy,
    /// Generate sparse vectors when the request does not say.
    pub hybrid_default: bool,
    /// Concurrent transform and embed workers per run.
    pub workers: usize,
    /// Size of the reader to worker channel, in batches.
    pub channel_buffer_size: usize,
    /// Inline payloads up to this many datapoints are ingested by streaming.
    pub streaming_threshold: usize,
    /// Skip ids already ingested by an earlier attempt of the same run id.
    pub resume: bool,
    /// A non-terminal run without a heartbeat for this long is abandoned.
    /// Heartbeats are written every third of it.
    pub lease: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            run_id_policy: RunIdPolicy::Generated,
            hybrid_default: false,
            workers: 4,
            channel_buffer_size: 16,
            streaming_threshold: 1000,
            resume: true,
            lease: Duration::from_secs(30),
        }
    }
}

/// The pipeline components a run is built from.
pub struct Components {
    pub reader: Arc<SourceReader>,
    pub transformer: Arc<RecordTransformer>,
    pub embedder: Arc<EmbeddingGenerator>,
    pub loader: Arc<IndexLoader>,
    pub store: Arc<dyn ObjectStore>,
    pub audit: Arc<dyn AuditStore>,
    pub writer: WriterConfig,
    pub retry: RetryPolicy,
}

/// Live state of a run started by this orchestrator.
struct RunHandle {
    state: Mutex<Run>,
    counters: Arc<RunCounters>,
    cancel_tx: watch::Sender<bool>,
    /// `Some(recorded)` once the run is over; `recorded` is false when its
    /// terminal state never reached the audit store.
    done_tx: watch::Sender<Option<bool>>,
    /// Serializes snapshot appends so the audit history stays in order.
    append_lock: Mutex<()>,
    /// The audit record was closed or taken over by another process.
    superseded: AtomicBool,
}

impl RunHandle {
    fn new(run: Run) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(None);
        Self {
            state: Mutex::new(run),
            counters: Arc::new(RunCounters::new()),
            cancel_tx,
            done_tx,
            append_lock: Mutex::new(()),
            superseded: AtomicBool::new(false),
        }
    }

    async fn snapshot(&self) -> Run {
        let mut run = self.state.lock().await.clone();
        run.counts = self.counters.snapshot();
        run
    }

    /// Apply `update` and return the resulting snapshot.
    async fn update(&self, update: impl FnOnce(&mut Run)) -> Run {
        let mut state = self.state.lock().await;
        update(&mut state);
        let mut run = state.clone();
        run.counts = self.counters.snapshot();
        run
    }
}

struct Inner {
    components: Components,
    config: OrchestratorConfig,
    runs: RwLock<HashMap<String, Arc<RunHandle>>>,
}

impl Inner {
    async fn append_current(&self, run: &Run) -> Result<bool, ServiceError> {
        self.components
            .retry
            .run("append_run", || self.components.audit.append_if_current(run))
            .await
            .map_err(|err| err.error)
    }

    /// Apply `update` to a live run and append the snapshot when it reports a change.
    ///
    /// Returns the snapshot when it changed. A run whose audit record was
    /// closed or taken over elsewhere is cancelled.
    async fn progress(&self, handle: &RunHandle, update: impl FnOnce(&mut Run) -> bool) -> Option<Run> {
        let _order = handle.append_lock.lock().await;
        let mut changed = false;
        let run = handle.update(|run| changed = !run.is_terminal() && update(run)).await;
        if !changed {
            return None;
        }
        match self.append_current(&run).await {
            Ok(true) => {}
            Ok(false) => self.release(handle, &run),
            Err(err) => warn!(run_id = %run.run_id, error = %err, "Failed to append run record"),
        }
        Some(run)
    }

    /// Apply the terminal `update` and record it.
    ///
    /// Returns the terminal snapshot and whether the audit store holds a
    /// terminal record for the run.
    async fn settle(&self, handle: &RunHandle, update: impl FnOnce(&mut Run)) -> (Run, bool) {
        let _order = handle.append_lock.lock().await;
        let run = handle.update(update).await;
        if handle.superseded.load(Ordering::SeqCst) {
            return (run, true);
        }

        for round in 1..=TERMINAL_APPEND_ROUNDS {
            match self.append_current(&run).await {
                Ok(true) => return (run, true),
                Ok(false) => {
                    self.release(handle, &run);
                    return (run, true);
                }
                Err(err) => {
                    error!(
                        run_id = %run.run_id,
                        round,
                        error = %err,
                        "Failed to record terminal run state"
                    );
                    if round < TERMINAL_APPEND_ROUNDS {
                        tokio::time::sleep(self.components.retry.delay(ErrorCategory::Transient, round)).await;
                    }
                }
            }
        }
        let run = handle
            .update(|run| {
                let cause = run.error.take().map(|e| format!("{}; ", e)).unwrap_or_default();
                run.error = Some(format!("{}terminal state not recorded in the audit store", cause));
            })
            .await;
        (run, false)
    }

    fn release(&self, handle: &RunHandle, run: &Run) {
        if !handle.superseded.swap(true, Ordering::SeqCst) {
            warn!(run_id = %run.run_id, "Run record closed elsewhere, stopping");
        }
        handle.cancel_tx.send_replace(true);
    }

    /// Whether the process driving `run` stopped renewing its lease.
    fn lease_expired(&self, run: &Run) -> bool {
        match (Utc::now() - run.last_seen()).to_std() {
            Ok(elapsed) => elapsed > self.config.lease,
            Err(_) => false,
        }
    }

    /// Drop the handle of a finished run, unless the id was reused meanwhile.
    async fn evict(&self, run_id: &str, handle: &Arc<RunHandle>) {
        let mut runs = self.runs.write().await;
        if runs.get(run_id).is_some_and(|current| Arc::ptr_eq(current, handle)) {
            runs.remove(run_id);
        }
    }
}

/// What a run will do, resolved from its request.
struct RunPlan {
    run_id: String,
    source: DatapointSource,
    mode: UpdateMode,
    hybrid: bool,
    ingestion: IngestionPath,
    output: ObjectUri,
    skip: HashSet<String>,
}

/// Orchestrator that coordinates the pipeline components.
///
/// Each run is driven by its own supervisor task. Status is served from the
/// live run while this process drives it, and from the audit store otherwise.
/// Processes sharing an audit store coordinate through run leases.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create a new orchestrator with the given components.
    pub fn new(components: Components) -> Self {
        Self::with_config(components, OrchestratorConfig::default())
    }

    /// Create a new orchestrator with custom configuration.
    pub fn with_config(components: Components, config: OrchestratorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                components,
                config,
                runs: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Validate a request and start a run in the background.
    ///
    /// # Returns
    ///
    /// The run id.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - A required field is missing or the request is inconsistent
    /// * `Conflict` - A non-terminal run with the same id is driven here, or
    ///   holds an unexpired lease in the audit store
    #[instrument(skip(self, request), fields(run_id = ?request.run_id))]
    pub async fn start_run(&self, request: RunRequest) -> Result<String, PipelineError> {
        let source = request
            .source
            .ok_or_else(|| PipelineError::invalid_argument("datapoint source is required"))?;
        let output_prefix = request
            .output_prefix
            .ok_or_else(|| PipelineError::invalid_argument("output prefix is required"))?;
        let mode = request
            .mode
            .ok_or_else(|| PipelineError::invalid_argument("mode is required"))?;
        let output_root: ObjectUri = output_prefix
            .parse()
            .map_err(|e: ServiceError| PipelineError::invalid_argument(e.to_string()))?;
        validate_source(&source)?;
        let ingestion = choose_ingestion(
            mode,
            &source,
            request.ingestion,
            self.inner.config.streaming_threshold,
        )?;

        let run_id = match (request.run_id, self.inner.config.run_id_policy) {
            (Some(id), _) if !id.trim().is_empty() => id.trim().to_string(),
            (_, RunIdPolicy::CallerSupplied) => {
                return Err(PipelineError::invalid_argument("run id is required"))
            }
            (_, RunIdPolicy::Generated) => generate_run_id(),
        };
        if run_id.contains('/') {
            return Err(PipelineError::invalid_argument("run id must not contain '/'"));
        }

        let hybrid = request.hybrid.unwrap_or(self.inner.config.hybrid_default);
        let created_at = Utc::now();
        let run = Run {
            run_id: run_id.clone(),
            update_type: request.update_type,
            mode,
            source: source.describe(),
            output_prefix: output_root.join(&run_id).to_string(),
            status: RunStatus::Queued,
            stage: None,
            ingestion,
            hybrid,
            counts: RunCounts::default(),
            rejects: RejectSummary::default(),
            shards: Vec::new(),
            cancel_requested: false,
            created_at,
            heartbeat_at: Some(created_at),
            started_at: None,
            ended_at: None,
            error: None,
        };

        // Claim the id in this process before any audit round trip.
        let handle = Arc::new(RunHandle::new(run.clone()));
        {
            let mut runs = self.inner.runs.write().await;
            if let Some(existing) = runs.get(&run_id) {
                if !existing.state.lock().await.is_terminal() {
                    return Err(PipelineError::conflict(format!("run {} is still active", run_id)));
                }
            }
            runs.insert(run_id.clone(), handle.clone());
        }

        let skip = match self.admit(&run).await {
            Ok(skip) => skip,
            Err(e) => {
                self.inner.evict(&run_id, &handle).await;
                return Err(e);
            }
        };

        info!(
            run_id = %run_id,
            mode = ?mode,
            ingestion = ?ingestion,
            hybrid,
            resumed_ids = skip.len(),
            "Run queued"
        );

        let plan = RunPlan {
            run_id: run_id.clone(),
            source,
            mode,
            hybrid,
            ingestion,
            output: output_root.join(&run_id),
            skip,
        };
        tokio::spawn(driver::drive(self.inner.clone(), handle, plan));

        Ok(run_id)
    }

    /// Check the audit record of a new run, load its resume watermark and
    /// record it as queued.
    async fn admit(&self, run: &Run) -> Result<HashSet<String>, PipelineError> {
        let components = &self.inner.components;
        let previous = components
            .audit
            .latest(&run.run_id)
            .await
            .map_err(PipelineError::storage)?;
        if let Some(previous) = &previous {
            if !previous.is_terminal() {
                if !self.inner.lease_expired(previous) {
                    return Err(PipelineError::conflict(format!(
                        "run {} is active in another process",
                        run.run_id
                    )));
                }
                warn!(
                    run_id = %run.run_id,
                    status = ?previous.status,
                    last_seen = %previous.last_seen(),
                    "Restarting abandoned run"
                );
            }
        }

        let skip = if self.inner.config.resume && run.mode != UpdateMode::Overwrite && previous.is_some() {
            components
                .audit
                .watermark(&WatermarkKey::of(run))
                .await
                .map_err(PipelineError::storage)?
        } else {
            HashSet::new()
        };

        components
            .retry
            .run("append_run", || components.audit.append(run))
            .await
            .map_err(|err| PipelineError::storage(err.error))?;
        Ok(skip)
    }

    /// Current state of a run.
    pub async fn get_status(&self, run_id: &str) -> Result<Run, PipelineError> {
        if let Some(handle) = self.handle(run_id).await {
            return Ok(handle.snapshot().await);
        }
        self.inner
            .components
            .audit
            .latest(run_id)
            .await
            .map_err(PipelineError::storage)?
            .ok_or_else(|| PipelineError::not_found(format!("run {}", run_id)))
    }

    /// Request cooperative cancellation of a run.
    ///
    /// Work in flight finishes its current batch or shard before the run
    /// becomes `CANCELLED`. A run driven by another process is flagged in the
    /// audit store and stops at that process's next heartbeat. A terminal run
    /// is returned unchanged.
    #[instrument(skip(self))]
    pub async fn cancel(&self, run_id: &str) -> Result<Run, PipelineError> {
        if let Some(handle) = self.handle(run_id).await {
            let requested = self
                .inner
                .progress(&handle, |run| {
                    let request = !run.cancel_requested;
                    run.cancel_requested = true;
                    request
                })
                .await;
            if requested.is_some() {
                handle.cancel_tx.send_replace(true);
                info!(run_id, "Cancellation requested");
            }
            return Ok(handle.snapshot().await);
        }

        let audit = &self.inner.components.audit;
        let run = self.get_status(run_id).await?;
        if run.is_terminal() {
            return Ok(run);
        }

        if self.inner.lease_expired(&run) {
            // Nobody drives it any more.
            warn!(run_id, status = ?run.status, last_seen = %run.last_seen(), "Cancelling abandoned run");
            let closed = Run {
                cancel_requested: true,
                status: RunStatus::Cancelled,
                ended_at: Some(Utc::now()),
                ..run
            };
            let appended = self
                .inner
                .append_current(&closed)
                .await
                .map_err(PipelineError::storage)?;
            return if appended { Ok(closed) } else { self.get_status(run_id).await };
        }

        let run = self
            .inner
            .components
            .retry
            .run("request_cancel", || audit.request_cancel(run_id))
            .await
            .map_err(|err| PipelineError::storage(err.error))?
            .ok_or_else(|| PipelineError::not_found(format!("run {}", run_id)))?;
        info!(run_id, "Cancellation requested from another process");
        Ok(run)
    }

    /// Wait until a run reaches a terminal state.
    ///
    /// # Errors
    ///
    /// * `StorageUnavailable` - The run finished but its terminal state could
    ///   not be recorded
    pub async fn wait(&self, run_id: &str) -> Result<Run, PipelineError> {
        match self.handle(run_id).await {
            Some(handle) => {
                let mut done = handle.done_tx.subscribe();
                // The sender lives in the handle, which we hold.
                let recorded = done
                    .wait_for(|done| done.is_some())
                    .await
                    .map(|done| *done == Some(true))
                    .unwrap_or(false);
                let run = handle.snapshot().await;
                if !recorded {
                    return Err(PipelineError::StorageUnavailable(format!(
                        "run {} ended as {:?} but its terminal state was not recorded",
                        run_id, run.status
                    )));
                }
                Ok(run)
            }
            None => self.get_status(run_id).await,
        }
    }

    /// Upsert pre-embedded datapoints directly into the index.
    ///
    /// Datapoints with the wrong dimension are reported as rejected.
    #[instrument(skip(self, datapoints), fields(count = datapoints.len()))]
    pub async fn stream_upsert(&self, datapoints: Vec<Datapoint>) -> Result<IngestOutcome, PipelineError> {
        if datapoints.is_empty() {
            return Err(PipelineError::invalid_argument("no datapoints to upsert"));
        }

        let components = &self.inner.components;
        let mut rejected = Vec::new();
        let mut valid = Vec::with_capacity(datapoints.len());
        for datapoint in datapoints {
            if datapoint.id.trim().is_empty() {
                rejected.push((datapoint.id, RejectReason::MissingIdentifier));
                continue;
            }
            match components.embedder.prepare_preembedded(datapoint) {
                Ok(datapoint) => valid.push(datapoint),
                Err((datapoint, reason)) => rejected.push((datapoint.id, reason)),
            }
        }

        let mut outcome = if valid.is_empty() {
            IngestOutcome::default()
        } else {
            components.loader.upsert(&valid).await?
        };
        outcome.rejected.extend(rejected);
        Ok(outcome)
    }

    /// Remove datapoints from the index by identifier.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn stream_delete(&self, ids: Vec<String>) -> Result<IngestOutcome, PipelineError> {
        if ids.is_empty() {
            return Err(PipelineError::invalid_argument("no datapoint ids to delete"));
        }
        if ids.iter().any(|id| id.trim().is_empty()) {
            return Err(PipelineError::invalid_argument("datapoint ids must not be blank"));
        }
        self.inner.components.loader.remove(&ids).await
    }

    async fn handle(&self, run_id: &str) -> Option<Arc<RunHandle>> {
        self.inner.runs.read().await.get(run_id).cloned()
    }
}

fn validate_source(source: &DatapointSource) -> Result<(), PipelineError> {
    match source {
        DatapointSource::ByQuery { table, .. } if table.trim().is_empty() => {
            Err(PipelineError::invalid_argument("query source needs a table"))
        }
        DatapointSource::ByGcsPrefix { prefix } => prefix
            .parse::<ObjectUri>()
            .map(|_| ())
            .map_err(|e| PipelineError::invalid_argument(e.to_string())),
        DatapointSource::ByApiPayload { datapoints } if datapoints.is_empty() => {
            Err(PipelineError::invalid_argument("payload source has no datapoints"))
        }
        _ => Ok(()),
    }
}

/// Pick the ingestion path of a run.
///
/// Overwrite always goes through a batch update and delete always streams.
/// Otherwise an explicit request wins, and small inline payloads stream.
fn choose_ingestion(
    mode: UpdateMode,
    source: &DatapointSource,
    requested: Option<IngestionPath>,
    streaming_threshold: usize,
) -> Result<IngestionPath, PipelineError> {
    match (mode, requested) {
        (UpdateMode::Overwrite, Some(IngestionPath::Streaming)) => Err(PipelineError::invalid_argument(
            "overwrite runs must use batch ingestion",
        )),
        (UpdateMode::Overwrite, _) => Ok(IngestionPath::Batch),
        (UpdateMode::Delete, Some(IngestionPath::Batch)) => Err(PipelineError::invalid_argument(
            "delete runs must use streaming ingestion",
        )),
        (UpdateMode::Delete, _) => Ok(IngestionPath::Streaming),
        (UpdateMode::Upsert, Some(path)) => Ok(path),
        (UpdateMode::Upsert, None) => match source.known_len() {
            Some(len) if len <= streaming_threshold => Ok(IngestionPath::Streaming),
            _ => Ok(IngestionPath::Batch),
        },
    }
}

fn generate_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("run-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &suffix[..8])
}
