//! Deadline-bounded single-task runs.
//!
//! Submit a task, wait up to a deadline, and guarantee the task is
//! cancelled on every exit path (success, timeout, task failure, or outer
//! cancellation) so a worker slot is never leaked to an abandoned wait.

use std::future::Future;
use std::time::Duration;

use crate::error::{QuiesceError, Result};
use crate::token::CancelToken;

use super::core::{TaskContext, WorkerPool};
use super::handle::TaskHandle;

/// Cancels the task when the scope is left, whatever the path.
struct CancelOnExit<'a, T> {
    handle: &'a TaskHandle<T>,
}

impl<T> Drop for CancelOnExit<'_, T> {
    fn drop(&mut self) {
        // Idempotent; a no-op for a task that already finished.
        self.handle.cancel(true);
    }
}

/// Runs `body` on the pool, waiting at most `deadline`.
///
/// On expiry the task is cancelled with interrupt and `Timeout` is
/// returned; a failure of the body propagates its own error kind.
pub async fn run_with_deadline<F, Fut, T>(
    pool: &WorkerPool,
    deadline: Duration,
    body: F,
) -> Result<T>
where
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = pool.submit(body).await?;
    let _guard = CancelOnExit { handle: &handle };
    handle.wait(Some(deadline)).await
}

/// Like [`run_with_deadline`], additionally honoring an outer token.
///
/// Cancellation of the outer call propagates to the task through the exit
/// guard.
pub async fn run_with_deadline_cancellable<F, Fut, T>(
    pool: &WorkerPool,
    deadline: Duration,
    outer: &CancelToken,
    body: F,
) -> Result<T>
where
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    outer.check()?;
    let handle = pool.submit(body).await?;
    let _guard = CancelOnExit { handle: &handle };
    tokio::select! {
        result = handle.wait(Some(deadline)) => result,
        _ = outer.tripped() => Err(QuiesceError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolConfig, PoolState};

    fn pool(workers: usize) -> WorkerPool {
        WorkerPool::new(PoolConfig {
            workers,
            queue_capacity: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn result_arrives_inside_the_deadline() {
        let pool = pool(2);
        let value = run_with_deadline(&pool, Duration::from_millis(200), |_ctx| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(pool.state(), PoolState::Running);
        pool.shutdown_graceful().await;
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_cancels_the_task_and_frees_the_worker() {
        let pool = pool(1);
        let result = run_with_deadline(&pool, Duration::from_millis(100), |ctx| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(500)) => Ok(1),
                _ = ctx.token().tripped() => Err(QuiesceError::Cancelled),
            }
        })
        .await;
        assert!(matches!(result, Err(QuiesceError::Timeout)));
        assert_eq!(pool.state(), PoolState::Running);

        // The single worker slot was released; later work still runs.
        let next = pool.submit(|_ctx| async move { Ok(2) }).await.unwrap();
        assert_eq!(next.wait(Some(Duration::from_secs(1))).await.unwrap(), 2);
        pool.shutdown_graceful().await;
    }

    #[tokio::test(start_paused = true)]
    async fn body_failure_propagates_its_own_kind() {
        let pool = pool(1);
        let result = run_with_deadline(&pool, Duration::from_secs(1), |_ctx| async move {
            Err::<(), _>(QuiesceError::Domain(anyhow::anyhow!("page unreachable")))
        })
        .await;
        assert!(matches!(result, Err(QuiesceError::Domain(_))));
        pool.shutdown_graceful().await;
    }

    #[tokio::test(start_paused = true)]
    async fn outer_cancellation_reaches_the_task() {
        let pool = pool(1);
        let outer = CancelToken::new();

        let o = outer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            o.trip();
        });

        let result =
            run_with_deadline_cancellable(&pool, Duration::from_secs(10), &outer, |ctx| {
                async move {
                    ctx.token().tripped().await;
                    Err::<(), _>(QuiesceError::Cancelled)
                }
            })
            .await;
        assert!(matches!(result, Err(QuiesceError::Cancelled)));

        // The guard tripped the task token on the way out.
        pool.shutdown_graceful().await;
    }
}
