//! Counters tracking pool and orchestrator activity.
//!
//! A [`CrawlStats`] instance is shared between a worker pool and the
//! orchestrator that owns it. All updates are atomic; a [`StatsSnapshot`]
//! captures a consistent-enough view for reporting at shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::info;

/// Thread-safe activity counters.
#[derive(Debug, Default)]
pub struct CrawlStats {
    tasks_submitted: AtomicUsize,
    tasks_completed: AtomicUsize,
    tasks_cancelled: AtomicUsize,
    tasks_failed: AtomicUsize,
    tasks_rejected: AtomicUsize,
    pages_completed: AtomicUsize,
    pages_requeued: AtomicUsize,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub tasks_submitted: usize,
    pub tasks_completed: usize,
    pub tasks_cancelled: usize,
    pub tasks_failed: usize,
    pub tasks_rejected: usize,
    pub pages_completed: usize,
    pub pages_requeued: usize,
}

impl CrawlStats {
    /// Creates a new, atomically reference-counted collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn increment_tasks_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_tasks_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_tasks_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_tasks_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_tasks_rejected(&self) {
        self.tasks_rejected.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_pages_completed(&self) {
        self.pages_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_pages_requeued(&self) {
        self.pages_requeued.fetch_add(1, Ordering::SeqCst);
    }

    /// Captures the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::SeqCst),
            tasks_completed: self.tasks_completed.load(Ordering::SeqCst),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::SeqCst),
            tasks_failed: self.tasks_failed.load(Ordering::SeqCst),
            tasks_rejected: self.tasks_rejected.load(Ordering::SeqCst),
            pages_completed: self.pages_completed.load(Ordering::SeqCst),
            pages_requeued: self.pages_requeued.load(Ordering::SeqCst),
        }
    }

    /// Logs a one-line summary of the counters at info level.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            tasks_submitted = s.tasks_submitted,
            tasks_completed = s.tasks_completed,
            tasks_cancelled = s.tasks_cancelled,
            tasks_failed = s.tasks_failed,
            tasks_rejected = s.tasks_rejected,
            pages_completed = s.pages_completed,
            pages_requeued = s.pages_requeued,
            "crawl statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = CrawlStats::new();
        stats.increment_tasks_submitted();
        stats.increment_tasks_submitted();
        stats.increment_tasks_completed();
        stats.increment_pages_requeued();

        let s = stats.snapshot();
        assert_eq!(s.tasks_submitted, 2);
        assert_eq!(s.tasks_completed, 1);
        assert_eq!(s.tasks_failed, 0);
        assert_eq!(s.pages_requeued, 1);
    }
}
