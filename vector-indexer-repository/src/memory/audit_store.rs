use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::ServiceError;
use crate::interfaces::AuditStore;
use vector_indexer_shared::{Run, WatermarkKey};

#[derive(Default)]
struct AuditLog {
    runs: Vec<Run>,
    watermarks: HashMap<WatermarkKey, HashSet<String>>,
}

/// Audit log held in memory.
#[derive(Default)]
pub struct InMemoryAuditStore {
    log: Mutex<AuditLog>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, run: &Run) -> Result<(), ServiceError> {
        self.log.lock().await.runs.push(run.clone());
        Ok(())
    }

    async fn append_if_current(&self, run: &Run) -> Result<bool, ServiceError> {
        let mut log = self.log.lock().await;
        let current = log
            .runs
            .iter()
            .rev()
            .find(|latest| latest.run_id == run.run_id)
            .is_some_and(|latest| !latest.is_terminal() && latest.same_attempt(run));
        if current {
            log.runs.push(run.clone());
        }
        Ok(current)
    }

    async fn request_cancel(&self, run_id: &str) -> Result<Option<Run>, ServiceError> {
        let mut log = self.log.lock().await;
        let Some(mut latest) = log.runs.iter().rev().find(|run| run.run_id == run_id).cloned()
        else {
            return Ok(None);
        };
        if !latest.is_terminal() && !latest.cancel_requested {
            latest.cancel_requested = true;
            log.runs.push(latest.clone());
        }
        Ok(Some(latest))
    }

    async fn latest(&self, run_id: &str) -> Result<Option<Run>, ServiceError> {
        let log = self.log.lock().await;
        Ok(log.runs.iter().rev().find(|run| run.run_id == run_id).cloned())
    }

    async fn history(&self, run_id: &str) -> Result<Vec<Run>, ServiceError> {
        let log = self.log.lock().await;
        Ok(log
            .runs
            .iter()
            .filter(|run| run.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn save_watermark(&self, key: &WatermarkKey, ids: &[String]) -> Result<(), ServiceError> {
        self.log
            .lock()
            .await
            .watermarks
            .entry(key.clone())
            .or_default()
            .extend(ids.iter().cloned());
        Ok(())
    }

    async fn watermark(&self, key: &WatermarkKey) -> Result<HashSet<String>, ServiceError> {
        Ok(self
            .log
            .lock()
            .await
            .watermarks
            .get(key)
            .cloned()
            .unwrap_or_default())
    }
}
