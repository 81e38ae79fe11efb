//! Observable counters the CLI/HTTP layer reports (spec.md §4.3).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct QueueStats {
    total_processed: AtomicU64,
    total_failed: AtomicU64,
    total_retried: AtomicU64,
    current_depth: AtomicI64,
}

impl QueueStats {
    pub fn record_processed(&self) {
        self.total_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.total_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.total_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_depth(&self, depth: i64) {
        self.current_depth.store(depth, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_retried: self.total_retried.load(Ordering::Relaxed),
            current_depth: self.current_depth.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct QueueStatsSnapshot {
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_retried: u64,
    pub current_depth: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let stats = QueueStats::default();
        stats.record_processed();
        stats.record_processed();
        stats.record_failed();
        stats.set_depth(7);

        let snap = stats.snapshot();
        assert_eq!(snap.total_processed, 2);
        assert_eq!(snap.total_failed, 1);
        assert_eq!(snap.current_depth, 7);
    }
}
