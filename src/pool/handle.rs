//! Handles to submitted tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kanal::AsyncReceiver;
use tracing::debug;

use crate::error::{QuiesceError, Result};
use crate::token::CancelToken;

use super::core::TaskMeta;

/// A handle to a task submitted to a [`WorkerPool`](super::WorkerPool).
///
/// The result is delivered once; a second [`wait`](TaskHandle::wait) after a
/// delivered result resolves `Cancelled`.
pub struct TaskHandle<T> {
    meta: TaskMeta,
    token: CancelToken,
    skip: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    result_rx: AsyncReceiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub(super) fn new(
        meta: TaskMeta,
        token: CancelToken,
        skip: Arc<AtomicBool>,
        done: Arc<AtomicBool>,
        result_rx: AsyncReceiver<Result<T>>,
    ) -> Self {
        Self {
            meta,
            token,
            skip,
            done,
            result_rx,
        }
    }

    /// The identity of the submission.
    pub fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    /// The task's cancellation token.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Whether the task body has finished (in any outcome).
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Cancels the task.
    ///
    /// With `interrupt = false` the task is prevented from starting but an
    /// already running body is left to finish. With `interrupt = true` the
    /// task token also trips, waking any suspension the body is parked on.
    /// Idempotent in both modes.
    pub fn cancel(&self, interrupt: bool) {
        self.skip.store(true, Ordering::SeqCst);
        if interrupt {
            self.token.trip();
        }
    }

    /// Waits for the task's result.
    ///
    /// With a deadline, expiry cancels the task with interrupt (releasing
    /// the worker slot) and fails with `Timeout`, a distinct outcome from
    /// the task itself being cancelled.
    pub async fn wait(&self, deadline: Option<Duration>) -> Result<T> {
        let received = match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, self.result_rx.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    debug!(task = self.meta.id, "wait deadline elapsed; cancelling task");
                    self.cancel(true);
                    return Err(QuiesceError::Timeout);
                }
            },
            None => self.result_rx.recv().await,
        };
        match received {
            Ok(result) => result,
            // The submission was dropped without running: drained at
            // shutdown, or skipped by a failed before_execute.
            Err(_) => Err(QuiesceError::Cancelled),
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("meta", &self.meta)
            .field("done", &self.is_done())
            .finish()
    }
}
