//! # Poison-Pill Pipeline Module
//!
//! A bounded producer–consumer driver that terminates by sentinel.
//!
//! ## Protocol
//!
//! A pipeline is declared for `N` producers and `M` consumers over an
//! *unbounded* work queue. Each producer, when it finishes its workload (or
//! observes cancellation), posts `M` pills (one per consumer) and posts
//! no real work afterwards. Each consumer swallows pills without processing
//! them and exits once it has seen one pill from every producer, i.e. `N`
//! pills. `N × M` pills are posted in total and all of them are consumed,
//! so after every consumer has exited no work item and no pill is left in
//! the queue.
//!
//! The queue must be unbounded: with a bounded queue a producer posting its
//! pills can deadlock against a consumer that has already exited. The
//! pipeline owns its queue and constructs it unbounded, which also makes
//! pill posting immune to cancellation: the pills always land.
//!
//! "No work after pills" is enforced by move semantics:
//! [`Producer::finish`] consumes the producer. A producer dropped without
//! finishing posts its pills from `Drop`, so an early return or a failure
//! on the producing side cannot strand the consumers.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{QuiesceError, Result};
use crate::queue::{PutError, WorkQueue};
use crate::token::CancelToken;

/// A queue slot: either real work or the termination sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope<T> {
    Work(T),
    Pill,
}

/// A poison-pill terminated producer–consumer pipeline.
pub struct PillPipeline<T> {
    queue: WorkQueue<Envelope<T>>,
    producers: usize,
    consumers: usize,
    producers_handed_out: AtomicUsize,
}

impl<T: Send + 'static> PillPipeline<T> {
    /// Declares a pipeline for exactly `producers` producers and
    /// `consumers` consumers.
    ///
    /// # Panics
    ///
    /// Panics if either count is zero.
    pub fn new(producers: usize, consumers: usize) -> Arc<Self> {
        assert!(producers > 0, "a pipeline needs at least one producer");
        assert!(consumers > 0, "a pipeline needs at least one consumer");
        Arc::new(Self {
            queue: WorkQueue::unbounded(),
            producers,
            consumers,
            producers_handed_out: AtomicUsize::new(0),
        })
    }

    /// The number of declared producers.
    pub fn producers(&self) -> usize {
        self.producers
    }

    /// The number of declared consumers.
    pub fn consumers(&self) -> usize {
        self.consumers
    }

    /// Items and pills currently queued.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Hands out one of the declared producer endpoints.
    ///
    /// # Panics
    ///
    /// Panics when called more times than producers were declared; an
    /// undeclared producer would break the consumers' pill arithmetic.
    pub fn producer(&self) -> Producer<T> {
        let n = self.producers_handed_out.fetch_add(1, Ordering::SeqCst);
        assert!(
            n < self.producers,
            "more producers requested than declared"
        );
        Producer {
            queue: self.queue.clone(),
            pills: self.consumers,
            finished: false,
        }
    }

    /// Runs one consumer until it has seen a pill from every producer.
    ///
    /// Work items are handed to `on_item`; its failures are logged and do
    /// not stop consumption. Returns the number of items processed.
    pub async fn consume<F, Fut>(&self, mut on_item: F) -> Result<usize>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut processed = 0usize;
        let mut pills_seen = 0usize;
        loop {
            match self.queue.take(None).await? {
                Envelope::Work(item) => {
                    if let Err(e) = on_item(item).await {
                        warn!(error = %e, "work item failed; consumer continues");
                    }
                    processed += 1;
                }
                Envelope::Pill => {
                    pills_seen += 1;
                    trace!(pills_seen, "consumer swallowed a pill");
                    if pills_seen == self.producers {
                        debug!(processed, "consumer exiting on final pill");
                        return Ok(processed);
                    }
                }
            }
        }
    }
}

/// One declared producer endpoint of a [`PillPipeline`].
pub struct Producer<T> {
    queue: WorkQueue<Envelope<T>>,
    pills: usize,
    finished: bool,
}

impl<T> Producer<T> {
    /// Enqueues a work item.
    ///
    /// Cancellation-aware: a tripped token fails with `Cancelled` and the
    /// queue is left unchanged. The pipeline queue is unbounded, so this
    /// never suspends.
    pub fn send(&self, item: T, token: Option<&CancelToken>) -> Result<()> {
        if let Some(token) = token {
            token.check()?;
        }
        match self.queue.try_put(Envelope::Work(item)) {
            Ok(()) => Ok(()),
            Err(PutError::Closed(_)) => Err(QuiesceError::Closed),
            Err(PutError::Full(_)) | Err(PutError::Cancelled(_)) => {
                unreachable!("pipeline queue is unbounded")
            }
        }
    }

    /// Declares this producer done: posts one pill per consumer.
    ///
    /// Consuming `self` makes work-after-pill unrepresentable. Pill posting
    /// ignores cancellation; the protocol requires the pills to land.
    pub fn finish(mut self) {
        self.post_pills();
        self.finished = true;
    }

    fn post_pills(&self) {
        trace!(pills = self.pills, "producer posting pills");
        for _ in 0..self.pills {
            if self.queue.try_put(Envelope::Pill).is_err() {
                // Closed queue: the consumers are already gone.
                warn!("pipeline queue closed while posting pills");
                return;
            }
        }
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        if !self.finished {
            // A producer abandoned mid-workload still owes its pills.
            self.post_pills();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn two_producers_three_consumers_drain_exactly_once() {
        let pipeline = PillPipeline::new(2, 3);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut consumers = Vec::new();
        for _ in 0..3 {
            let pipeline = Arc::clone(&pipeline);
            let seen = Arc::clone(&seen);
            consumers.push(tokio::spawn(async move {
                pipeline
                    .consume(|item: u32| {
                        let seen = Arc::clone(&seen);
                        async move {
                            seen.lock().push(item);
                            Ok(())
                        }
                    })
                    .await
            }));
        }

        let mut producers = Vec::new();
        for _ in 0..2 {
            let endpoint = pipeline.producer();
            producers.push(tokio::spawn(async move {
                for item in [1u32, 2, 3] {
                    endpoint.send(item, None).unwrap();
                }
                endpoint.finish();
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        let mut total = 0;
        for consumer in consumers {
            total += tokio::time::timeout(Duration::from_secs(5), consumer)
                .await
                .expect("consumer exited")
                .unwrap()
                .unwrap();
        }
        assert_eq!(total, 6);

        let mut items = seen.lock().clone();
        items.sort_unstable();
        assert_eq!(items, vec![1, 1, 2, 2, 3, 3]);
        // All 2 × 3 pills were swallowed as well.
        assert_eq!(pipeline.queued(), 0);
    }

    #[tokio::test]
    async fn single_consumer_waits_for_a_pill_from_every_producer() {
        let pipeline = PillPipeline::new(3, 1);

        for n in 0..3u32 {
            let endpoint = pipeline.producer();
            endpoint.send(n, None).unwrap();
            endpoint.finish();
        }

        let processed = pipeline.consume(|_item| async { Ok(()) }).await.unwrap();
        assert_eq!(processed, 3);
        assert_eq!(pipeline.queued(), 0);
    }

    #[tokio::test]
    async fn cancelled_producer_still_posts_pills() {
        let pipeline = PillPipeline::new(1, 2);
        let token = CancelToken::new();
        token.trip();

        let endpoint = pipeline.producer();
        assert!(matches!(
            endpoint.send(1u32, Some(&token)),
            Err(QuiesceError::Cancelled)
        ));
        endpoint.finish();

        // Both consumers still terminate: the pills landed despite the
        // cancelled workload.
        for _ in 0..2 {
            let processed = pipeline.consume(|_item| async { Ok(()) }).await.unwrap();
            assert_eq!(processed, 0);
        }
        assert_eq!(pipeline.queued(), 0);
    }

    #[tokio::test]
    async fn dropped_producer_posts_pills_from_drop() {
        let pipeline = PillPipeline::new(1, 1);
        {
            let endpoint = pipeline.producer();
            endpoint.send(5u32, None).unwrap();
            // Dropped without finish(): an early-return on the producing side.
        }
        let processed = pipeline.consume(|_item| async { Ok(()) }).await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(pipeline.queued(), 0);
    }

    #[tokio::test]
    async fn failing_work_items_do_not_stop_the_consumer() {
        let pipeline = PillPipeline::new(1, 1);
        let endpoint = pipeline.producer();
        for n in 0..4u32 {
            endpoint.send(n, None).unwrap();
        }
        endpoint.finish();

        let processed = pipeline
            .consume(|item| async move {
                if item % 2 == 0 {
                    Err(QuiesceError::Domain(anyhow::anyhow!("even items fail")))
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert_eq!(processed, 4);
    }
}
