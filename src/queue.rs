//! # Work Queue Module
//!
//! A FIFO queue of owned work items with blocking, cancellation-aware
//! endpoints, used both as the worker pool's run queue and as the transport
//! of the poison-pill pipeline.
//!
//! ## Overview
//!
//! A [`WorkQueue`] is a shared handle (cloning is cheap) over a mutex-guarded
//! buffer with two waiter sets: producers suspended on a full queue and
//! consumers suspended on an empty one. Capacity is fixed at construction;
//! [`WorkQueue::unbounded`] builds a queue whose `put` never suspends, which
//! is what the poison-pill discipline requires to stay deadlock-free.
//!
//! ## Cancellation
//!
//! `put` and `take` accept an optional [`CancelToken`]. A tripped token makes
//! the suspended call fail promptly and leaves the queue untouched: a
//! cancelled `take` never consumes an item, and a cancelled `put` hands the
//! item back to the caller. Enqueueing and returning success are atomic under
//! the internal lock, so a `Cancelled` outcome from `put` always means the
//! item was not enqueued.
//!
//! ## Shutdown
//!
//! [`WorkQueue::close`] is idempotent: later `put`s fail with the item
//! returned, while `take` keeps draining whatever is already queued and only
//! then reports [`QuiesceError::Closed`]. [`WorkQueue::drain`] removes all
//! queued items at once; abrupt pool shutdown uses it to salvage unstarted
//! work. No item is ever silently dropped.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{QuiesceError, Result};
use crate::token::CancelToken;

/// Failure outcomes of `put`/`try_put`, each handing the item back.
pub enum PutError<T> {
    /// The queue is at capacity (non-blocking attempt only).
    Full(T),
    /// The cancellation token tripped before the item could be enqueued.
    Cancelled(T),
    /// The queue has been closed.
    Closed(T),
}

impl<T> PutError<T> {
    /// Recovers the item that was not enqueued.
    pub fn into_inner(self) -> T {
        match self {
            PutError::Full(item) | PutError::Cancelled(item) | PutError::Closed(item) => item,
        }
    }
}

impl<T> std::fmt::Debug for PutError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PutError::Full(_) => f.write_str("PutError::Full"),
            PutError::Cancelled(_) => f.write_str("PutError::Cancelled"),
            PutError::Closed(_) => f.write_str("PutError::Closed"),
        }
    }
}

/// Failure outcomes of `try_take`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeError {
    /// Nothing queued right now.
    Empty,
    /// The queue is closed and fully drained.
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
    capacity: Option<usize>,
    /// Woken when space frees up or the queue closes.
    space: Notify,
    /// Woken when an item arrives or the queue closes.
    arrival: Notify,
}

/// A FIFO work-item queue with cancellation-aware blocking endpoints.
pub struct WorkQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> WorkQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        Self::with_capacity(Some(capacity))
    }

    /// Creates a queue whose `put` never suspends.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    closed: false,
                }),
                capacity,
                space: Notify::new(),
                arrival: Notify::new(),
            }),
        }
    }

    /// The fixed capacity, or `None` for an unbounded queue.
    pub fn capacity(&self) -> Option<usize> {
        self.shared.capacity
    }

    /// The number of items currently queued.
    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    /// Whether nothing is currently queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking enqueue attempt.
    pub fn try_put(&self, item: T) -> std::result::Result<(), PutError<T>> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(PutError::Closed(item));
            }
            if let Some(cap) = self.shared.capacity {
                if state.items.len() >= cap {
                    return Err(PutError::Full(item));
                }
            }
            state.items.push_back(item);
        }
        self.shared.arrival.notify_waiters();
        Ok(())
    }

    /// Non-blocking dequeue attempt.
    pub fn try_take(&self) -> std::result::Result<T, TakeError> {
        let popped = {
            let mut state = self.shared.state.lock();
            match state.items.pop_front() {
                Some(item) => Some(item),
                None if state.closed => return Err(TakeError::Closed),
                None => None,
            }
        };
        match popped {
            Some(item) => {
                self.shared.space.notify_waiters();
                Ok(item)
            }
            None => Err(TakeError::Empty),
        }
    }

    /// Enqueues `item`, suspending while the queue is full.
    ///
    /// With a token, a trip observed while suspended (or on entry) fails with
    /// [`PutError::Cancelled`], handing the item back with the queue
    /// unchanged. Closure fails with [`PutError::Closed`].
    pub async fn put(
        &self,
        item: T,
        token: Option<&CancelToken>,
    ) -> std::result::Result<(), PutError<T>> {
        let mut item = item;
        loop {
            item = match self.try_put(item) {
                Ok(()) => return Ok(()),
                Err(PutError::Full(item)) => item,
                Err(other) => return Err(other),
            };
            if let Some(token) = token {
                if token.is_tripped() {
                    return Err(PutError::Cancelled(item));
                }
            }
            let space = self.shared.space.notified();
            tokio::pin!(space);
            // Register interest before re-checking so a take that freed a
            // slot in between cannot be missed.
            space.as_mut().enable();
            item = match self.try_put(item) {
                Ok(()) => return Ok(()),
                Err(PutError::Full(item)) => item,
                Err(other) => return Err(other),
            };
            match token {
                Some(token) => {
                    tokio::select! {
                        _ = &mut space => {}
                        _ = token.tripped() => return Err(PutError::Cancelled(item)),
                    }
                }
                None => space.await,
            }
        }
    }

    /// Dequeues the oldest item, suspending while the queue is empty.
    ///
    /// With a token, a trip fails with `Cancelled` without consuming
    /// anything. Once the queue is closed and drained, fails with `Closed`.
    pub async fn take(&self, token: Option<&CancelToken>) -> Result<T> {
        loop {
            match self.try_take() {
                Ok(item) => return Ok(item),
                Err(TakeError::Closed) => return Err(QuiesceError::Closed),
                Err(TakeError::Empty) => {}
            }
            if let Some(token) = token {
                if token.is_tripped() {
                    return Err(QuiesceError::Cancelled);
                }
            }
            let arrival = self.shared.arrival.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();
            match self.try_take() {
                Ok(item) => return Ok(item),
                Err(TakeError::Closed) => return Err(QuiesceError::Closed),
                Err(TakeError::Empty) => {}
            }
            match token {
                Some(token) => {
                    tokio::select! {
                        _ = &mut arrival => {}
                        _ = token.tripped() => return Err(QuiesceError::Cancelled),
                    }
                }
                None => arrival.await,
            }
        }
    }

    /// Closes the queue. Idempotent.
    ///
    /// Queued items remain takeable; new `put`s fail immediately.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.shared.space.notify_waiters();
        self.shared.arrival.notify_waiters();
    }

    /// Removes and returns everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let drained: Vec<T> = {
            let mut state = self.shared.state.lock();
            state.items.drain(..).collect()
        };
        if !drained.is_empty() {
            self.shared.space.notify_waiters();
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn items_come_out_in_put_order() {
        let queue = WorkQueue::bounded(4);
        for n in 0..4 {
            queue.put(n, None).await.unwrap();
        }
        for n in 0..4 {
            assert_eq!(queue.take(None).await.unwrap(), n);
        }
    }

    #[tokio::test]
    async fn try_put_reports_full_and_hands_item_back() {
        let queue = WorkQueue::bounded(1);
        queue.try_put(1).unwrap();
        match queue.try_put(2) {
            Err(PutError::Full(item)) => assert_eq!(item, 2),
            other => panic!("expected Full, got {other:?}"),
        }
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn try_take_reports_empty() {
        let queue = WorkQueue::<u32>::bounded(1);
        assert_eq!(queue.try_take(), Err(TakeError::Empty));
    }

    #[tokio::test]
    async fn put_with_tripped_token_does_not_enqueue() {
        let queue = WorkQueue::bounded(1);
        queue.put(1, None).await.unwrap();

        let token = CancelToken::new();
        token.trip();
        match queue.put(2, Some(&token)).await {
            Err(PutError::Cancelled(item)) => assert_eq!(item, 2),
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn suspended_put_wakes_on_trip() {
        let queue = WorkQueue::bounded(1);
        queue.put(1u32, None).await.unwrap();
        let token = CancelToken::new();

        let q = queue.clone();
        let t = token.clone();
        let blocked = tokio::spawn(async move { q.put(2, Some(&t)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.trip();

        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("put woke")
            .unwrap();
        assert!(matches!(result, Err(PutError::Cancelled(2))));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn suspended_take_wakes_on_trip_without_consuming() {
        let queue = WorkQueue::<u32>::bounded(1);
        let token = CancelToken::new();

        let q = queue.clone();
        let t = token.clone();
        let blocked = tokio::spawn(async move { q.take(Some(&t)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.trip();

        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("take woke")
            .unwrap();
        assert!(matches!(result, Err(QuiesceError::Cancelled)));

        // The queue was left untouched; a later item is still delivered.
        queue.try_put(9).unwrap();
        assert_eq!(queue.try_take(), Ok(9));
    }

    #[tokio::test]
    async fn close_drains_then_reports_closed() {
        let queue = WorkQueue::bounded(4);
        queue.put(1, None).await.unwrap();
        queue.put(2, None).await.unwrap();
        queue.close();
        queue.close();

        assert!(matches!(queue.try_put(3), Err(PutError::Closed(3))));
        assert_eq!(queue.take(None).await.unwrap(), 1);
        assert_eq!(queue.take(None).await.unwrap(), 2);
        assert!(matches!(
            queue.take(None).await,
            Err(QuiesceError::Closed)
        ));
    }

    #[tokio::test]
    async fn close_wakes_suspended_taker() {
        let queue = WorkQueue::<u32>::bounded(1);
        let q = queue.clone();
        let blocked = tokio::spawn(async move { q.take(None).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("take woke")
            .unwrap();
        assert!(matches!(result, Err(QuiesceError::Closed)));
    }

    #[tokio::test]
    async fn drain_salvages_queued_items() {
        let queue = WorkQueue::bounded(8);
        for n in 0..5 {
            queue.put(n, None).await.unwrap();
        }
        assert_eq!(queue.drain(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn unbounded_put_never_suspends() {
        let queue = WorkQueue::unbounded();
        assert_eq!(queue.capacity(), None);
        for n in 0..10_000 {
            queue.try_put(n).unwrap();
        }
        assert_eq!(queue.len(), 10_000);
    }

    #[tokio::test]
    async fn producer_unblocks_when_consumer_frees_space() {
        let queue = WorkQueue::bounded(1);
        queue.put(1u32, None).await.unwrap();

        let q = queue.clone();
        let blocked = tokio::spawn(async move { q.put(2, None).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.take(None).await.unwrap(), 1);

        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("put woke")
            .unwrap()
            .unwrap();
        assert_eq!(queue.take(None).await.unwrap(), 2);
    }
}
