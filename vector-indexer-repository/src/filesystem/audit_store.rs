use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::errors::ServiceError;
use crate::interfaces::AuditStore;
use crate::shards::parse_lines;
use vector_indexer_shared::{Run, WatermarkKey};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum AuditEntry {
    Run(Box<Run>),
    Watermark { key: WatermarkKey, ids: Vec<String> },
}

/// Audit log kept in an append-only JSON lines file.
///
/// `append_if_current` checks and appends under a lock held by this process
/// only; processes sharing the file rely on run leases instead.
pub struct JsonLinesAuditStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesAuditStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn write_entry(&self, entry: &AuditEntry) -> Result<(), ServiceError> {
        let _guard = self.write_lock.lock().await;
        self.write_locked(entry).await
    }

    /// Append one line. Callers hold `write_lock`.
    async fn write_locked(&self, entry: &AuditEntry) -> Result<(), ServiceError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<AuditEntry>, ServiceError> {
        match fs::read(&self.path).await {
            Ok(bytes) => parse_lines(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl AuditStore for JsonLinesAuditStore {
    async fn append(&self, run: &Run) -> Result<(), ServiceError> {
        self.write_entry(&AuditEntry::Run(Box::new(run.clone()))).await
    }

    async fn append_if_current(&self, run: &Run) -> Result<bool, ServiceError> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .latest(&run.run_id)
            .await?
            .is_some_and(|latest| !latest.is_terminal() && latest.same_attempt(run));
        if current {
            self.write_locked(&AuditEntry::Run(Box::new(run.clone())))
                .await?;
        }
        Ok(current)
    }

    async fn request_cancel(&self, run_id: &str) -> Result<Option<Run>, ServiceError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut latest) = self.latest(run_id).await? else {
            return Ok(None);
        };
        if !latest.is_terminal() && !latest.cancel_requested {
            latest.cancel_requested = true;
            self.write_locked(&AuditEntry::Run(Box::new(latest.clone())))
                .await?;
        }
        Ok(Some(latest))
    }

    async fn latest(&self, run_id: &str) -> Result<Option<Run>, ServiceError> {
        Ok(self.history(run_id).await?.pop())
    }

    async fn history(&self, run_id: &str) -> Result<Vec<Run>, ServiceError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter_map(|entry| match entry {
                AuditEntry::Run(run) if run.run_id == run_id => Some(*run),
                _ => None,
            })
            .collect())
    }

    async fn save_watermark(&self, key: &WatermarkKey, ids: &[String]) -> Result<(), ServiceError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.write_entry(&AuditEntry::Watermark {
            key: key.clone(),
            ids: ids.to_vec(),
        })
        .await
    }

    async fn watermark(&self, key: &WatermarkKey) -> Result<HashSet<String>, ServiceError> {
        let mut ids = HashSet::new();
        for entry in self.entries().await? {
            if let AuditEntry::Watermark { key: scope, ids: batch } = entry {
                if scope == *key {
                    ids.extend(batch);
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vector_indexer_shared::{
        IngestionPath, RejectSummary, RunCounts, RunStatus, SourceDescriptor, UpdateMode,
        UpdateType,
    };

    fn run(run_id: &str, status: RunStatus) -> Run {
        Run {
            run_id: run_id.to_string(),
            update_type: UpdateType::Scheduled,
            mode: UpdateMode::Upsert,
            source: SourceDescriptor::GcsPrefix {
                prefix: "gs://bucket/in".to_string(),
            },
            output_prefix: "gs://bucket/out".to_string(),
            status,
            stage: None,
            ingestion: IngestionPath::Batch,
            hybrid: false,
            counts: RunCounts::default(),
            rejects: RejectSummary::default(),
            shards: Vec::new(),
            cancel_requested: false,
            created_at: Utc::now(),
            heartbeat_at: None,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    fn with_status(run: &Run, status: RunStatus) -> Run {
        Run {
            status,
            ..run.clone()
        }
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit/runs.jsonl");

        let store = JsonLinesAuditStore::new(&path);
        let r1 = run("r1", RunStatus::Queued);
        store.append(&r1).await.unwrap();
        store.append(&run("r2", RunStatus::Queued)).await.unwrap();
        store.append(&with_status(&r1, RunStatus::Running)).await.unwrap();
        let key = WatermarkKey::of(&r1);
        store.save_watermark(&key, &["a".to_string(), "b".to_string()]).await.unwrap();

        let reopened = JsonLinesAuditStore::new(&path);
        let history = reopened.history("r1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            reopened.latest("r1").await.unwrap().map(|r| r.status),
            Some(RunStatus::Running)
        );
        assert_eq!(reopened.watermark(&key).await.unwrap().len(), 2);

        let delete_key = WatermarkKey {
            mode: UpdateMode::Delete,
            ..key
        };
        assert!(reopened.watermark(&delete_key).await.unwrap().is_empty());
        let other = WatermarkKey::of(&run("r2", RunStatus::Queued));
        assert!(reopened.watermark(&other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_if_current_stops_at_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesAuditStore::new(dir.path().join("runs.jsonl"));

        let queued = run("r1", RunStatus::Queued);
        assert!(!store.append_if_current(&queued).await.unwrap());
        store.append(&queued).await.unwrap();
        assert!(store
            .append_if_current(&with_status(&queued, RunStatus::Running))
            .await
            .unwrap());

        let flagged = store.request_cancel("r1").await.unwrap().unwrap();
        assert!(flagged.cancel_requested);
        assert_eq!(flagged.status, RunStatus::Running);
        assert!(store.request_cancel("missing").await.unwrap().is_none());

        store.append(&with_status(&queued, RunStatus::Cancelled)).await.unwrap();
        assert!(!store
            .append_if_current(&with_status(&queued, RunStatus::Succeeded))
            .await
            .unwrap());

        let mut next = run("r1", RunStatus::Queued);
        next.created_at = queued.created_at + chrono::Duration::seconds(1);
        store.append(&next).await.unwrap();
        assert!(!store
            .append_if_current(&with_status(&queued, RunStatus::Running))
            .await
            .unwrap());
        assert_eq!(
            store.latest("r1").await.unwrap().map(|r| r.status),
            Some(RunStatus::Queued)
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesAuditStore::new(dir.path().join("none.jsonl"));
        assert!(store.latest("r1").await.unwrap().is_none());
    }
}
