//! # Worker Pool Module
//!
//! A fixed set of workers consuming task submissions from a shared run
//! queue, with graceful and abrupt shutdown.
//!
//! ## Overview
//!
//! A [`WorkerPool`] spawns its workers at construction; each worker loops
//! taking submissions off the run queue and executing them. Submissions are
//! closures over a [`TaskContext`] that exposes the task's own
//! [`CancelToken`]; cancellation is strictly cooperative: the pool sets
//! signals and wakes suspensions, it never forcibly halts a body.
//!
//! ## Lifecycle
//!
//! The pool moves one way through [`PoolState`]:
//!
//! - `Running` accepts submissions.
//! - `Draining` (after [`WorkerPool::shutdown_graceful`]) rejects new
//!   submissions and runs everything already queued to completion.
//! - `Stopping` (after [`WorkerPool::shutdown_now`]) rejects new
//!   submissions, drains the queue into an unstarted list that is handed
//!   back to the caller, and trips the pool token plus every running task's
//!   token. Running tasks observe the trip at their next suspension or poll.
//! - `Terminated` once the last worker has exited.
//!
//! ## Failure handling
//!
//! A task body failing with a domain error is logged and surfaced only
//! through its own handle; the worker keeps accepting work. The optional
//! hooks in [`PoolHooks`] run in the worker's context; a failing
//! `before_execute` skips that task (and its `after_execute`) without
//! affecting any other.
//!
//! ## Known hazard
//!
//! Tasks that wait on the results of other tasks submitted to the *same*
//! pool can deadlock once every worker is occupied by a waiter. The pool
//! does not attempt to detect this; keep dependent work in separate pools
//! or use an unbounded worker count for strictly tree-shaped submission
//! graphs.
//!
//! ## Example
//!
//! ```rust,ignore
//! use quiesce::{PoolConfig, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolConfig::default());
//! let handle = pool
//!     .submit(|ctx| async move {
//!         ctx.check()?;
//!         Ok::<_, quiesce::QuiesceError>(21 * 2)
//!     })
//!     .await?;
//! assert_eq!(handle.wait(None).await?, 42);
//! pool.shutdown_graceful().await;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};

use crate::error::{QuiesceError, Result};
use crate::queue::WorkQueue;
use crate::stats::CrawlStats;
use crate::token::CancelToken;

use super::handle::TaskHandle;

/// The one-way lifecycle of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PoolState {
    /// Accepting submissions.
    Running = 0,
    /// Graceful shutdown: queued tasks still run, submissions are rejected.
    Draining = 1,
    /// Abrupt shutdown: queued tasks were drained, tokens are tripped.
    Stopping = 2,
    /// All workers have exited.
    Terminated = 3,
}

fn state_from(raw: u8) -> PoolState {
    match raw {
        0 => PoolState::Running,
        1 => PoolState::Draining,
        2 => PoolState::Stopping,
        _ => PoolState::Terminated,
    }
}

/// Sizing knobs for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers spawned at construction.
    pub workers: usize,
    /// Run-queue capacity; `None` means unbounded.
    ///
    /// An unbounded run queue is the right default when tasks submit
    /// further tasks to the same pool (see the thread-starvation note in
    /// the module docs).
    pub queue_capacity: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            workers: num_cpus::get().clamp(2, 16),
            queue_capacity: None,
        }
    }
}

/// Identity of a submission, visible to hooks and shutdown reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMeta {
    /// Pool-unique, monotonically assigned.
    pub id: u64,
    /// Caller-supplied identity of the underlying work item, if any.
    pub label: Option<String>,
}

/// How a task body exited, as seen by the worker and the hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Per-task environment handed to the body.
#[derive(Clone)]
pub struct TaskContext {
    token: CancelToken,
}

impl TaskContext {
    /// The task's own cancellation token.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Poll point: fails with `Cancelled` once the task token has tripped.
    pub fn check(&self) -> Result<()> {
        self.token.check()
    }

    /// Installs a hook run when this task is cancelled.
    ///
    /// This is the attachment point for blocking-I/O cancellation: register
    /// a hook that closes the underlying resource, and treat the resulting
    /// resource-closed failure as a cancellation outcome.
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.token.register(hook);
    }
}

type BeforeExecute = Box<dyn Fn(&TaskMeta) -> Result<()> + Send + Sync>;
type AfterExecute = Box<dyn Fn(&TaskMeta, &TaskOutcome) + Send + Sync>;
type Terminated = Box<dyn FnOnce() + Send>;

/// Optional lifecycle callbacks, passed at construction.
///
/// This is a capability set rather than an inheritance surface: supply only
/// the hooks you need.
#[derive(Default)]
pub struct PoolHooks {
    before_execute: Option<BeforeExecute>,
    after_execute: Option<AfterExecute>,
    terminated: Mutex<Option<Terminated>>,
}

impl PoolHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs in the worker before each task body; a failure skips the task
    /// and its `after_execute`.
    pub fn on_before_execute<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TaskMeta) -> Result<()> + Send + Sync + 'static,
    {
        self.before_execute = Some(Box::new(hook));
        self
    }

    /// Runs in the worker after each task body with the observed outcome.
    pub fn on_after_execute<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TaskMeta, &TaskOutcome) + Send + Sync + 'static,
    {
        self.after_execute = Some(Box::new(hook));
        self
    }

    /// Runs exactly once, in the last worker to exit.
    pub fn on_terminated<F>(self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        *self.terminated.lock() = Some(Box::new(hook));
        self
    }
}

type TaskRunner = Box<dyn FnOnce(TaskContext) -> BoxFuture<'static, TaskOutcome> + Send>;

pub(super) struct Submission {
    pub(super) meta: TaskMeta,
    token: CancelToken,
    skip: Arc<AtomicBool>,
    run: TaskRunner,
}

pub(super) struct PoolInner {
    state: AtomicU8,
    token: CancelToken,
    run_queue: WorkQueue<Submission>,
    running: DashMap<u64, CancelToken>,
    live_workers: AtomicUsize,
    termination: Notify,
    hooks: PoolHooks,
    stats: Arc<CrawlStats>,
    next_task_id: AtomicU64,
}

/// A fixed-size pool of workers over a shared run queue.
///
/// Cloning is cheap and shares the pool. A pool must be shut down
/// explicitly; dropping every handle without a shutdown leaves the workers
/// parked on the run queue.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Spawns `config.workers` workers on the current tokio runtime.
    pub fn new(config: PoolConfig) -> Self {
        Self::with_hooks(config, PoolHooks::default(), CrawlStats::new())
    }

    /// Like [`new`](Self::new), with lifecycle hooks and a shared stats
    /// collector.
    ///
    /// # Panics
    ///
    /// Panics if `config.workers` is zero.
    pub fn with_hooks(config: PoolConfig, hooks: PoolHooks, stats: Arc<CrawlStats>) -> Self {
        assert!(config.workers > 0, "a pool needs at least one worker");

        let run_queue = match config.queue_capacity {
            Some(capacity) => WorkQueue::bounded(capacity),
            None => WorkQueue::unbounded(),
        };

        let inner = Arc::new(PoolInner {
            state: AtomicU8::new(PoolState::Running as u8),
            token: CancelToken::new(),
            run_queue,
            running: DashMap::new(),
            live_workers: AtomicUsize::new(config.workers),
            termination: Notify::new(),
            hooks,
            stats,
            next_task_id: AtomicU64::new(0),
        });

        for worker_id in 0..config.workers {
            let inner = Arc::clone(&inner);
            tokio::spawn(worker_loop(inner, worker_id));
        }

        info!(
            workers = config.workers,
            queue_capacity = ?config.queue_capacity,
            "worker pool started"
        );
        WorkerPool { inner }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> PoolState {
        state_from(self.inner.state.load(Ordering::SeqCst))
    }

    /// Whether abrupt shutdown has begun.
    pub fn is_stopping(&self) -> bool {
        self.state() >= PoolState::Stopping
    }

    /// The pool-level cancellation token. Trips once, on `shutdown_now`.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.inner.token
    }

    /// The shared statistics collector.
    pub fn stats(&self) -> Arc<CrawlStats> {
        Arc::clone(&self.inner.stats)
    }

    /// Submits a task. See [`submit_labeled`](Self::submit_labeled).
    pub async fn submit<F, Fut, T>(&self, body: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_inner(None, body).await
    }

    /// Submits a task carrying the identity of its work item.
    ///
    /// Fails with `Rejected` unless the pool is `Running`; a submit racing a
    /// shutdown either lands before the run queue closes or fails
    /// deterministically with `Rejected`. A successful submission
    /// happens-before the start of the task body.
    ///
    /// The body receives a [`TaskContext`]; a body that can be cancelled
    /// before it first runs should begin with `ctx.check()`.
    pub async fn submit_labeled<F, Fut, T>(
        &self,
        label: impl Into<String>,
        body: F,
    ) -> Result<TaskHandle<T>>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_inner(Some(label.into()), body).await
    }

    async fn submit_inner<F, Fut, T>(&self, label: Option<String>, body: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.state() != PoolState::Running {
            self.inner.stats.increment_tasks_rejected();
            return Err(QuiesceError::Rejected);
        }

        let id = self.inner.next_task_id.fetch_add(1, Ordering::SeqCst);
        let meta = TaskMeta { id, label };
        let token = CancelToken::new();
        let skip = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let (result_tx, result_rx) = kanal::bounded_async::<Result<T>>(1);

        let run: TaskRunner = {
            let skip = Arc::clone(&skip);
            let done = Arc::clone(&done);
            Box::new(move |ctx: TaskContext| {
                async move {
                    if skip.load(Ordering::SeqCst) {
                        done.store(true, Ordering::SeqCst);
                        let _ = result_tx.send(Err(QuiesceError::Cancelled)).await;
                        return TaskOutcome::Cancelled;
                    }
                    let result = body(ctx).await;
                    let outcome = match &result {
                        Ok(_) => TaskOutcome::Completed,
                        Err(e) if e.is_cancelled() => TaskOutcome::Cancelled,
                        Err(e) => TaskOutcome::Failed(e.to_string()),
                    };
                    done.store(true, Ordering::SeqCst);
                    let _ = result_tx.send(result).await;
                    outcome
                }
                .boxed()
            })
        };

        let submission = Submission {
            meta: meta.clone(),
            token: token.clone(),
            skip: Arc::clone(&skip),
            run,
        };

        match self.inner.run_queue.put(submission, Some(&self.inner.token)).await {
            Ok(()) => {
                self.inner.stats.increment_tasks_submitted();
                trace!(task = id, "task submitted");
                Ok(TaskHandle::new(meta, token, skip, done, result_rx))
            }
            Err(_) => {
                self.inner.stats.increment_tasks_rejected();
                Err(QuiesceError::Rejected)
            }
        }
    }

    /// Begins a graceful shutdown and waits for termination.
    ///
    /// New submissions are rejected; everything already queued runs to
    /// completion.
    pub async fn shutdown_graceful(&self) {
        self.inner
            .state
            .fetch_max(PoolState::Draining as u8, Ordering::SeqCst);
        self.inner.run_queue.close();
        info!("pool draining; queued tasks will run to completion");
        self.await_termination(None).await;
    }

    /// Begins an abrupt shutdown.
    ///
    /// Closes and drains the run queue, returning the submissions that never
    /// started; trips the pool token and every running task's token.
    /// Currently executing tasks observe the trip at their next suspension
    /// or poll; their handles resolve normally, while handles of drained
    /// submissions resolve `Cancelled`.
    pub fn shutdown_now(&self) -> Vec<TaskMeta> {
        self.inner
            .state
            .fetch_max(PoolState::Stopping as u8, Ordering::SeqCst);
        self.inner.run_queue.close();

        let drained = self.inner.run_queue.drain();
        let unstarted: Vec<TaskMeta> = drained
            .into_iter()
            .map(|submission| {
                // Dropping the submission closes its result slot, resolving
                // the handle with `Cancelled`.
                self.inner.stats.increment_tasks_cancelled();
                submission.meta
            })
            .collect();

        self.inner.token.trip();
        for entry in self.inner.running.iter() {
            entry.value().trip();
        }

        info!(
            unstarted = unstarted.len(),
            running = self.inner.running.len(),
            "pool stopping; queued tasks drained"
        );
        unstarted
    }

    /// Waits until every worker has exited, or the deadline expires.
    ///
    /// Returns `true` once the pool is `Terminated`.
    pub async fn await_termination(&self, deadline: Option<Duration>) -> bool {
        let wait = async {
            loop {
                if self.state() == PoolState::Terminated {
                    return;
                }
                let notified = self.inner.termination.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.state() == PoolState::Terminated {
                    return;
                }
                notified.await;
            }
        };
        match deadline {
            Some(deadline) => tokio::time::timeout(deadline, wait).await.is_ok(),
            None => {
                wait.await;
                true
            }
        }
    }
}

async fn worker_loop(inner: Arc<PoolInner>, worker_id: usize) {
    trace!(worker_id, "worker started");
    loop {
        let submission = match inner.run_queue.take(None).await {
            Ok(submission) => submission,
            // Queue closed and drained: the pool is shutting down.
            Err(_) => break,
        };
        execute(&inner, submission).await;
    }

    trace!(worker_id, "worker exiting");
    if inner.live_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
        inner
            .state
            .fetch_max(PoolState::Terminated as u8, Ordering::SeqCst);
        if let Some(hook) = inner.hooks.terminated.lock().take() {
            hook();
        }
        inner.termination.notify_waiters();
        debug!("worker pool terminated");
    }
}

async fn execute(inner: &Arc<PoolInner>, submission: Submission) {
    let Submission {
        meta,
        token,
        skip,
        run,
    } = submission;
    let ctx = TaskContext {
        token: token.clone(),
    };

    // Cancelled through its handle before it ever started: deliver the
    // outcome without touching the body or the hooks.
    if skip.load(Ordering::SeqCst) {
        trace!(task = meta.id, "task cancelled before start");
        let _ = (run)(ctx).await;
        inner.stats.increment_tasks_cancelled();
        return;
    }

    inner.running.insert(meta.id, token.clone());
    // shutdown_now advances the state before walking the registry, so a
    // task registered after the walk picks the trip up here.
    if state_from(inner.state.load(Ordering::SeqCst)) >= PoolState::Stopping {
        token.trip();
    }

    if let Some(before) = &inner.hooks.before_execute {
        if let Err(e) = before(&meta) {
            warn!(task = meta.id, error = %e, "before_execute failed; task skipped");
            inner.running.remove(&meta.id);
            inner.stats.increment_tasks_cancelled();
            // The result slot closes unused; the handle resolves Cancelled.
            drop(run);
            return;
        }
    }

    trace!(task = meta.id, "task started");
    let outcome = (run)(ctx).await;
    match &outcome {
        TaskOutcome::Completed => inner.stats.increment_tasks_completed(),
        TaskOutcome::Cancelled => {
            inner.stats.increment_tasks_cancelled();
            debug!(task = meta.id, "task exited under cancellation");
        }
        TaskOutcome::Failed(message) => {
            inner.stats.increment_tasks_failed();
            error!(task = meta.id, error = %message, "task failed");
        }
    }
    if let Some(after) = &inner.hooks.after_execute {
        after(&meta, &outcome);
    }
    inner.running.remove(&meta.id);
}
