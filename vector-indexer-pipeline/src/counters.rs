//! Per-run stage counters.

use std::sync::atomic::{AtomicU64, Ordering};

use vector_indexer_shared::{RunCounts, Stage};

/// Atomically updated record counts for one run.
///
/// Counts are bumped in stage order (a record is counted as read before it
/// is counted as embedded, and so on), and [`RunCounters::snapshot`] loads them
/// in reverse stage order, so every snapshot satisfies
/// `ingested <= written <= embedded <= read`.
#[derive(Debug, Default)]
pub struct RunCounters {
    read: AtomicU64,
    embedded: AtomicU64,
    written: AtomicU64,
    ingested: AtomicU64,
    skipped: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` records to the count of `stage`.
    ///
    /// `Validate` has no count of its own; validated records are counted
    /// when they are embedded.
    pub fn add(&self, stage: Stage, n: u64) {
        let counter = match stage {
            Stage::Read => &self.read,
            Stage::Embed => &self.embedded,
            Stage::Write => &self.written,
            Stage::Ingest => &self.ingested,
            Stage::Validate => return,
        };
        counter.fetch_add(n, Ordering::SeqCst);
    }

    /// Count records skipped because an earlier attempt ingested them.
    pub fn add_skipped(&self, n: u64) {
        self.skipped.fetch_add(n, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> RunCounts {
        let ingested = self.ingested.load(Ordering::SeqCst);
        let written = self.written.load(Ordering::SeqCst);
        let embedded = self.embedded.load(Ordering::SeqCst);
        let read = self.read.load(Ordering::SeqCst);
        RunCounts {
            read,
            embedded,
            written,
            ingested,
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_add_and_snapshot() {
        let counters = RunCounters::new();
        counters.add(Stage::Read, 10);
        counters.add(Stage::Validate, 10);
        counters.add(Stage::Embed, 8);
        counters.add(Stage::Write, 8);
        counters.add_skipped(2);

        let counts = counters.snapshot();
        assert_eq!(counts.read, 10);
        assert_eq!(counts.embedded, 8);
        assert_eq!(counts.ingested, 0);
        assert_eq!(counts.skipped, 2);
        assert!(counts.is_consistent());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_snapshots_stay_consistent() {
        let counters = Arc::new(RunCounters::new());

        let writer = {
            let counters = counters.clone();
            tokio::spawn(async move {
                for _ in 0..2000 {
                    counters.add(Stage::Read, 1);
                    counters.add(Stage::Embed, 1);
                    counters.add(Stage::Write, 1);
                    counters.add(Stage::Ingest, 1);
                }
            })
        };

        let mut previous = RunCounts::default();
        while !writer.is_finished() {
            let counts = counters.snapshot();
            assert!(counts.is_consistent());
            assert!(counts.dominates(&previous));
            previous = counts;
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert_eq!(counters.snapshot().ingested, 2000);
    }
}
