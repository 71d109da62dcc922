//! Test doubles shared by the pipeline tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::retry::RetryPolicy;
use vector_indexer_repository::{EmbeddingModel, EmbeddingTask, ServiceError};

/// Retry policy with millisecond delays.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_delay_ms: 1,
        max_delay_ms: 2,
        jitter: false,
        call_timeout: Duration::from_secs(30),
    }
}

/// Deterministic embedding model returning hash-derived vectors.
#[derive(Default)]
pub struct MockEmbeddingModel {
    poison: Option<String>,
    failure: Option<ServiceError>,
    gate: Option<watch::Receiver<bool>>,
    dimension_offset: usize,
    calls: AtomicUsize,
    last_task: Mutex<Option<EmbeddingTask>>,
}

impl MockEmbeddingModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail, as unavailable, every call containing a text with `marker`.
    pub fn poison(mut self, marker: &str) -> Self {
        self.poison = Some(marker.to_string());
        self
    }

    /// Fail every call with `error`.
    pub fn fail_with(mut self, error: ServiceError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Hold every call until the gate reads `true`.
    pub fn gated(mut self, gate: watch::Receiver<bool>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Return vectors with `offset` extra dimensions.
    pub fn dimension_offset(mut self, offset: usize) -> Self {
        self.dimension_offset = offset;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_task(&self) -> Option<EmbeddingTask> {
        *self.last_task.lock().unwrap()
    }
}

#[async_trait]
impl EmbeddingModel for MockEmbeddingModel {
    async fn embed(
        &self,
        texts: &[String],
        task: EmbeddingTask,
        dimension: usize,
    ) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_task.lock().unwrap() = Some(task);

        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            let _ = gate.wait_for(|open| *open).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if let Some(marker) = &self.poison {
            if texts.iter().any(|text| text.contains(marker.as_str())) {
                return Err(ServiceError::unavailable("model replica crashed"));
            }
        }

        Ok(texts
            .iter()
            .map(|text| hash_vector(text, dimension + self.dimension_offset))
            .collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }
}

/// Deterministic, non-normalized vector for `text`.
pub fn hash_vector(text: &str, dimension: usize) -> Vec<f32> {
    (0..dimension)
        .map(|i| {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            (hasher.finish() % 2000) as f32 / 1000.0 - 0.999
        })
        .collect()
}
