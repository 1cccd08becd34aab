//! # Orchestrator Module
//!
//! Drives a crawl over a tracking worker pool and guarantees that no
//! identity is lost across stop/start cycles.
//!
//! ## Overview
//!
//! A [`CrawlOrchestrator`] owns two sets and a pool. `pending` holds the
//! identities that are owed processing and is guarded by the orchestrator's
//! own lock; `seen` is the concurrent dedupe set consulted with an atomic
//! check-and-insert before any identity is dispatched. The pool is created
//! on [`start`](CrawlOrchestrator::start) and released on
//! [`stop`](CrawlOrchestrator::stop).
//!
//! ## Shutdown accounting
//!
//! `stop` performs an abrupt pool shutdown and folds two lists back into
//! `pending`: the submissions that never started (returned by the drain)
//! and the tasks observed to exit under cancellation (read from the
//! tracking wrapper once the pool has terminated). Identities whose tasks
//! fail with a domain error requeue themselves when they fail. The result:
//! an identity leaves the orchestrator's custody only by completing.
//!
//! ## Locking rule
//!
//! The `pending` lock is never held across a pool or queue call. Every
//! dispatch first drains or clones what it needs under the lock, releases
//! it, and only then calls into the pool.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashSet;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::builder::OrchestratorConfig;
use crate::checkpoint::{save_checkpoint, CrawlCheckpoint};
use crate::error::{QuiesceError, Result};
use crate::pool::{PoolConfig, PoolHooks, TaskContext, TrackingPool, WorkerPool};
use crate::stats::CrawlStats;

use super::processor::{PageId, PageProcessor};

/// The domain-level crawl driver. Used behind an [`Arc`].
pub struct CrawlOrchestrator<P: PageProcessor> {
    processor: Arc<P>,
    config: OrchestratorConfig,
    /// Identities owed processing. Guarded by the orchestrator lock; never
    /// held across a pool or queue call.
    pending: Mutex<HashSet<PageId>>,
    /// Identities ever dispatched; atomic check-and-insert dedupe.
    seen: DashSet<PageId>,
    pool: Mutex<Option<TrackingPool>>,
    stats: Arc<CrawlStats>,
}

impl<P: PageProcessor> CrawlOrchestrator<P> {
    /// Creates an orchestrator seeded from the processor's
    /// [`seeds`](PageProcessor::seeds).
    pub fn new(processor: P, config: OrchestratorConfig) -> Arc<Self> {
        Self::build(processor, config, CrawlCheckpoint::default())
    }

    /// Creates an orchestrator whose `pending` and `seen` sets are restored
    /// from a checkpoint, then seeds any identities not already known.
    pub fn from_checkpoint(
        processor: P,
        config: OrchestratorConfig,
        checkpoint: CrawlCheckpoint,
    ) -> Arc<Self> {
        info!(
            pending = checkpoint.pending.len(),
            seen = checkpoint.seen.len(),
            "restoring orchestrator from checkpoint"
        );
        Self::build(processor, config, checkpoint)
    }

    fn build(processor: P, config: OrchestratorConfig, checkpoint: CrawlCheckpoint) -> Arc<Self> {
        let seen = DashSet::new();
        for id in checkpoint.seen {
            seen.insert(id);
        }
        let this = Arc::new(Self {
            processor: Arc::new(processor),
            config,
            pending: Mutex::new(checkpoint.pending),
            seen,
            pool: Mutex::new(None),
            stats: CrawlStats::new(),
        });
        for seed in this.processor.seeds() {
            this.enqueue_seed(seed);
        }
        this
    }

    /// Offers an identity to the crawl. Returns `false` for a duplicate.
    pub fn enqueue_seed(&self, id: PageId) -> bool {
        if self.seen.insert(id.clone()) {
            trace!(page = %id, "seed accepted");
            self.pending.lock().insert(id);
            true
        } else {
            false
        }
    }

    /// Whether a pool is currently attached.
    pub fn is_running(&self) -> bool {
        self.pool.lock().is_some()
    }

    /// A copy of the current pending set.
    pub fn pending_snapshot(&self) -> Vec<PageId> {
        self.pending.lock().iter().cloned().collect()
    }

    /// The shared statistics collector.
    pub fn stats(&self) -> Arc<CrawlStats> {
        Arc::clone(&self.stats)
    }

    /// A serializable snapshot of `pending` and `seen`.
    pub fn checkpoint(&self) -> CrawlCheckpoint {
        CrawlCheckpoint {
            pending: self.pending.lock().iter().cloned().collect(),
            seen: self.seen.iter().map(|entry| entry.key().clone()).collect(),
        }
    }

    /// Writes the checkpoint to the configured path.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.config.checkpoint_path else {
            return Err(QuiesceError::IllegalState(
                "no checkpoint path configured",
            ));
        };
        save_checkpoint(path, &self.checkpoint())
    }

    /// Builds the pool and dispatches every pending identity.
    ///
    /// Identities drained from `pending` here bypass the `seen` check: they
    /// already passed it when first discovered and are owed processing.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let pool = {
            let mut guard = self.pool.lock();
            if guard.is_some() {
                return Err(QuiesceError::IllegalState("orchestrator already running"));
            }
            let pool = TrackingPool::new(WorkerPool::with_hooks(
                PoolConfig {
                    workers: self.config.workers,
                    queue_capacity: self.config.queue_capacity,
                },
                PoolHooks::default(),
                Arc::clone(&self.stats),
            ));
            *guard = Some(pool.clone());
            pool
        };

        let batch: Vec<PageId> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        info!(pages = batch.len(), "crawl starting");

        for id in batch {
            if let Err(e) = Arc::clone(self).submit_crawl(pool.clone(), id.clone()).await {
                warn!(page = %id, error = %e, "submission failed; identity kept pending");
                self.pending.lock().insert(id);
            }
        }
        Ok(())
    }

    /// Stops the crawl and returns the new pending set.
    ///
    /// Unstarted submissions and tasks cancelled mid-execution are folded
    /// into `pending`; the pool is released.
    pub async fn stop(&self) -> Result<Vec<PageId>> {
        let pool = { self.pool.lock().take() }
            .ok_or(QuiesceError::IllegalState("orchestrator is not running"))?;

        let unstarted = pool.shutdown_now();
        if !pool.await_termination(Some(self.config.stop_deadline)).await {
            // Running work cannot be killed, only waited out; the
            // cancelled-at-shutdown snapshot needs a terminated pool.
            warn!("stop deadline elapsed; waiting for remaining workers");
            pool.await_termination(None).await;
        }
        let cancelled = pool.cancelled_at_shutdown()?;

        let snapshot: Vec<PageId> = {
            let mut pending = self.pending.lock();
            for meta in &unstarted {
                if let Some(label) = &meta.label {
                    pending.insert(label.clone());
                }
            }
            for label in &cancelled {
                pending.insert(label.clone());
            }
            pending.iter().cloned().collect()
        };

        info!(
            unstarted = unstarted.len(),
            cancelled = cancelled.len(),
            pending = snapshot.len(),
            "crawl stopped"
        );
        self.stats.log_summary();
        Ok(snapshot)
    }

    /// Submits one crawl task. Boxed because crawl tasks submit their
    /// successors through the same path.
    fn submit_crawl(
        self: Arc<Self>,
        pool: TrackingPool,
        id: PageId,
    ) -> BoxFuture<'static, Result<()>> {
        async move {
            let task_pool = pool.clone();
            let page = id.clone();
            let this = Arc::clone(&self);
            let handle = pool
                .submit_labeled(id, move |ctx| this.crawl_page(task_pool, page, ctx))
                .await?;
            // Fire and forget: outcomes surface through tracking and stats.
            drop(handle);
            Ok(())
        }
        .boxed()
    }

    /// The crawl task body: process one page, dispatch its successors.
    async fn crawl_page(
        self: Arc<Self>,
        pool: TrackingPool,
        id: PageId,
        ctx: TaskContext,
    ) -> Result<()> {
        trace!(page = %id, "processing page");
        let outcome = tokio::select! {
            outcome = self.processor.process_page(&id) => outcome,
            // The processor never sees the token; abandoning the call at
            // the trip is this task's suspension point for blocking fetches.
            _ = ctx.token().tripped() => Err(QuiesceError::Cancelled),
        };

        match outcome {
            Ok(successors) => {
                for next in successors {
                    if ctx.token().is_tripped() {
                        // Stop dispatching. This task exits under
                        // cancellation, so the page is requeued on stop and
                        // the remaining successors are rediscovered then.
                        debug!(page = %id, "cancelled while dispatching successors");
                        return Err(QuiesceError::Cancelled);
                    }
                    if !self.seen.insert(next.clone()) {
                        trace!(page = %next, "duplicate successor skipped");
                        continue;
                    }
                    if let Err(e) = Arc::clone(&self)
                        .submit_crawl(pool.clone(), next.clone())
                        .await
                    {
                        // Most likely rejected by a closing pool: keep the
                        // identity instead of losing it.
                        debug!(page = %next, error = %e, "successor kept pending");
                        self.pending.lock().insert(next);
                    }
                }
                self.stats.increment_pages_completed();
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(page = %id, error = %e, "page failed; identity requeued");
                self.stats.increment_pages_requeued();
                self.pending.lock().insert(id);
                Err(e)
            }
        }
    }
}
