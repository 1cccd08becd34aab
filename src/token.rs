//! One-shot cooperative cancellation token.
//!
//! A [`CancelToken`] carries two pieces of state. The `tripped` bit is
//! monotonic: [`CancelToken::trip`] sets it exactly once and it is never
//! cleared, so every blocking operation parameterized by the token keeps
//! failing promptly with `Cancelled` from that point on. The `interrupted`
//! bit is the transient delivery flag set alongside it; unlike `tripped` it
//! can be taken with [`CancelToken::clear_interrupt`] by code that wants to
//! observe delivery for its own purposes.
//!
//! Contract for the transient bit: code that clears it and does not itself
//! act on the cancellation must call [`CancelToken::set_interrupt`] before
//! returning to code it does not own. The tracking wrapper reads exactly
//! this bit when a task body finishes; a swallowed interrupt loses the
//! record.
//!
//! Hooks registered with [`CancelToken::register`] run at most once, on the
//! tripping call, and never under the token's internal lock. Registering on
//! an already-tripped token runs the hook immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::{QuiesceError, Result};

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TokenInner {
    tripped: AtomicBool,
    interrupted: AtomicBool,
    hooks: Mutex<Vec<Hook>>,
    notify: Notify,
}

/// A one-shot cancellation signal with poll, wait, and hook delivery.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Creates a token in the armed state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the token. Idempotent: only the first call delivers.
    ///
    /// Establishes a happens-before edge to every subsequent
    /// [`is_tripped`](Self::is_tripped) observing `true`, runs registered
    /// hooks outside the internal lock, and wakes all suspended
    /// [`tripped`](Self::tripped) waiters.
    pub fn trip(&self) {
        if self.inner.tripped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.interrupted.store(true, Ordering::SeqCst);
        let hooks = std::mem::take(&mut *self.inner.hooks.lock());
        trace!(hooks = hooks.len(), "cancellation token tripped");
        for hook in hooks {
            hook();
        }
        self.inner.notify.notify_waiters();
    }

    /// Wait-free observation of the monotonic state.
    pub fn is_tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::SeqCst)
    }

    /// Fails with `Cancelled` if the token has tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_tripped() {
            Err(QuiesceError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Registers a one-shot hook to run when the token trips.
    ///
    /// An already-tripped token runs the hook immediately on the calling
    /// thread. In either case the hook runs outside the token's lock.
    pub fn register<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut hooks = self.inner.hooks.lock();
            if !self.inner.tripped.load(Ordering::SeqCst) {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Suspends until the token trips. Returns immediately if it already has.
    pub async fn tripped(&self) {
        loop {
            if self.is_tripped() {
                return;
            }
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before the final state check so a trip that
            // lands in between cannot be missed.
            notified.as_mut().enable();
            if self.is_tripped() {
                return;
            }
            notified.await;
        }
    }

    /// Polls the transient interrupt-delivery bit without clearing it.
    pub fn interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Takes the transient interrupt-delivery bit, returning its prior value.
    ///
    /// A caller that clears the bit and does not act on the cancellation
    /// must restore it with [`set_interrupt`](Self::set_interrupt) before
    /// returning.
    pub fn clear_interrupt(&self) -> bool {
        self.inner.interrupted.swap(false, Ordering::SeqCst)
    }

    /// Restores the transient interrupt-delivery bit.
    pub fn set_interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("tripped", &self.is_tripped())
            .field("interrupted", &self.interrupted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn trip_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_tripped());
        token.trip();
        token.trip();
        token.trip();
        assert!(token.is_tripped());
        assert!(token.check().is_err());
    }

    #[test]
    fn hooks_run_exactly_once() {
        let token = CancelToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        token.register(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        token.trip();
        token.trip();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_after_trip_runs_immediately() {
        let token = CancelToken::new();
        token.trip();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        token.register(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tripped_wakes_suspended_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let joined = tokio::spawn(async move {
            waiter.tripped().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.trip();
        tokio::time::timeout(Duration::from_secs(1), joined)
            .await
            .expect("waiter woke")
            .unwrap();
    }

    #[tokio::test]
    async fn tripped_returns_immediately_when_already_tripped() {
        let token = CancelToken::new();
        token.trip();
        token.tripped().await;
    }

    #[test]
    fn interrupt_bit_clears_and_restores() {
        let token = CancelToken::new();
        token.trip();
        assert!(token.interrupted());

        // A helper observes delivery for its own purposes and clears it.
        assert!(token.clear_interrupt());
        assert!(!token.interrupted());
        // The monotonic bit is unaffected: blocking operations keep failing.
        assert!(token.check().is_err());

        // Restore per the contract; the next observer still sees delivery.
        token.set_interrupt();
        assert!(token.interrupted());
    }
}
