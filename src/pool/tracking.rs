//! # Tracking Pool Module
//!
//! A wrapper that records which tasks exited while the pool was stopping.
//!
//! ## Overview
//!
//! Abrupt shutdown splits in-flight work into two groups: submissions that
//! never started (returned by `shutdown_now` directly) and bodies that were
//! already running when the tokens tripped. A [`TrackingPool`] captures the
//! second group: every submission gets a finalization shim that runs after
//! the body returns and, if the pool is stopping and the task token still
//! carries its interrupt delivery, appends the task's label to the
//! cancelled-at-shutdown set.
//!
//! The set grows only from worker finalization and is readable only once
//! the underlying pool has terminated, so readers always see a stable
//! snapshot. A body that clears its interrupt delivery and does not restore
//! it loses its record; the restore contract lives with the body, and the
//! shim does not second-guess it.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use crossbeam::queue::SegQueue;
use tracing::debug;

use crate::error::{QuiesceError, Result};
use crate::stats::CrawlStats;
use crate::token::CancelToken;

use super::core::{PoolState, TaskContext, TaskMeta, WorkerPool};
use super::handle::TaskHandle;

/// A [`WorkerPool`] adapter that tracks tasks cancelled at shutdown.
#[derive(Clone)]
pub struct TrackingPool {
    pool: WorkerPool,
    cancelled: Arc<SegQueue<String>>,
    snapshot: Arc<OnceLock<Vec<String>>>,
}

impl TrackingPool {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            cancelled: Arc::new(SegQueue::new()),
            snapshot: Arc::new(OnceLock::new()),
        }
    }

    /// The wrapped pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn state(&self) -> PoolState {
        self.pool.state()
    }

    pub fn is_stopping(&self) -> bool {
        self.pool.is_stopping()
    }

    pub fn stats(&self) -> Arc<CrawlStats> {
        self.pool.stats()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        self.pool.cancel_token()
    }

    /// Submits a labeled task with the finalization shim installed.
    pub async fn submit_labeled<F, Fut, T>(
        &self,
        label: impl Into<String>,
        body: F,
    ) -> Result<TaskHandle<T>>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let label = label.into();
        let pool = self.pool.clone();
        let cancelled = Arc::clone(&self.cancelled);
        let shim_label = label.clone();

        self.pool
            .submit_labeled(label, move |ctx| async move {
                // Claimed by a worker after shutdown began: the body never
                // runs, but the identity still counts as cancelled.
                if ctx.token().is_tripped() {
                    if pool.is_stopping() && ctx.token().interrupted() {
                        debug!(task = %shim_label, "recorded as cancelled before start");
                        cancelled.push(shim_label);
                    }
                    return Err(QuiesceError::Cancelled);
                }

                let shim_ctx = ctx.clone();
                let result = body(ctx).await;
                if pool.is_stopping() && shim_ctx.token().interrupted() {
                    debug!(task = %shim_label, "recorded as cancelled at shutdown");
                    cancelled.push(shim_label);
                }
                result
            })
            .await
    }

    pub fn shutdown_now(&self) -> Vec<TaskMeta> {
        self.pool.shutdown_now()
    }

    pub async fn shutdown_graceful(&self) {
        self.pool.shutdown_graceful().await;
    }

    pub async fn await_termination(&self, deadline: Option<Duration>) -> bool {
        self.pool.await_termination(deadline).await
    }

    /// The labels of tasks observed to exit under the pool's shutdown.
    ///
    /// Fails with `IllegalState` unless the pool has terminated; the first
    /// successful read freezes the snapshot.
    pub fn cancelled_at_shutdown(&self) -> Result<Vec<String>> {
        if self.pool.state() != PoolState::Terminated {
            return Err(QuiesceError::IllegalState(
                "cancelled_at_shutdown requires a terminated pool",
            ));
        }
        let snapshot = self.snapshot.get_or_init(|| {
            let mut labels = Vec::new();
            while let Some(label) = self.cancelled.pop() {
                labels.push(label);
            }
            labels
        });
        Ok(snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use tokio::sync::{Notify, Semaphore};

    fn tracking_pool(workers: usize) -> TrackingPool {
        TrackingPool::new(WorkerPool::new(PoolConfig {
            workers,
            queue_capacity: None,
        }))
    }

    #[tokio::test]
    async fn reading_before_termination_is_illegal() {
        let pool = tracking_pool(1);
        assert!(matches!(
            pool.cancelled_at_shutdown(),
            Err(QuiesceError::IllegalState(_))
        ));
        pool.shutdown_graceful().await;
        assert_eq!(pool.cancelled_at_shutdown().unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn records_tasks_interrupted_by_shutdown() {
        let pool = tracking_pool(2);
        let started = Arc::new(Semaphore::new(0));

        let mut handles = Vec::new();
        for label in ["left", "right"] {
            let started = Arc::clone(&started);
            let handle = pool
                .submit_labeled(label, move |ctx| async move {
                    started.add_permits(1);
                    ctx.token().tripped().await;
                    Err::<(), _>(QuiesceError::Cancelled)
                })
                .await
                .unwrap();
            handles.push(handle);
        }
        let _both_running = started.acquire_many(2).await.unwrap();

        let unstarted = pool.shutdown_now();
        assert!(unstarted.is_empty());
        assert!(pool.await_termination(Some(Duration::from_secs(1))).await);

        let mut cancelled = pool.cancelled_at_shutdown().unwrap();
        cancelled.sort();
        assert_eq!(cancelled, vec!["left", "right"]);
        // The snapshot is stable across reads.
        assert_eq!(pool.cancelled_at_shutdown().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn completed_tasks_are_not_recorded() {
        let pool = tracking_pool(1);
        let done = pool
            .submit_labeled("done", |_ctx| async move { Ok(()) })
            .await
            .unwrap();
        done.wait(None).await.unwrap();

        pool.shutdown_now();
        assert!(pool.await_termination(Some(Duration::from_secs(1))).await);
        assert!(pool.cancelled_at_shutdown().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cleared_interrupt_is_restored_before_return() {
        // A helper observes the cancellation for bookkeeping, clears the
        // delivery bit, and restores it per the contract; the record and the
        // next poll both still see the cancellation.
        let pool = tracking_pool(1);
        let started = Arc::new(Notify::new());

        let s = Arc::clone(&started);
        let handle = pool
            .submit_labeled("restored", move |ctx| async move {
                s.notify_one();
                ctx.token().tripped().await;

                // Helper: take the transient signal for its own purposes...
                let observed = ctx.token().clear_interrupt();
                assert!(observed);
                // ...and restore it before handing control back.
                ctx.token().set_interrupt();

                // The next suspension point still observes the cancellation.
                assert!(ctx.check().is_err());
                Err::<(), _>(QuiesceError::Cancelled)
            })
            .await
            .unwrap();
        started.notified().await;

        pool.shutdown_now();
        assert!(pool.await_termination(Some(Duration::from_secs(1))).await);
        assert!(matches!(
            handle.wait(None).await,
            Err(QuiesceError::Cancelled)
        ));
        assert_eq!(pool.cancelled_at_shutdown().unwrap(), vec!["restored"]);
    }
}
