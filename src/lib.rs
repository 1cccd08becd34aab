//! # quiesce
//!
//! Cooperative cancellation, orderly worker-pool shutdown, and restartable
//! crawl orchestration.
//!
//! Provides the main components: `CancelToken`, `WorkQueue`, `WorkerPool`
//! (with its `TrackingPool` adapter and deadline-bounded runs),
//! `PillPipeline`, and the `CrawlOrchestrator` built on top of them.
//!
//! Cancellation everywhere in this crate is cooperative: tripping a token
//! never halts a computation, it sets a durable signal, wakes current
//! suspensions, and relies on the work to observe it. Shutdown never loses
//! work items: whatever does not complete is handed back, either as the
//! unstarted drain of an abrupt pool shutdown or as the orchestrator's
//! pending set.
//!
//! ## Example
//!
//! ```rust,ignore
//! use quiesce::{async_trait, OrchestratorBuilder, PageId, PageProcessor};
//!
//! struct SiteProcessor;
//!
//! #[async_trait]
//! impl PageProcessor for SiteProcessor {
//!     fn seeds(&self) -> Vec<PageId> {
//!         vec!["https://example.com/".into()]
//!     }
//!     async fn process_page(&self, id: &PageId) -> quiesce::Result<Vec<PageId>> {
//!         todo!("fetch the page, return discovered links")
//!     }
//! }
//!
//! async fn run() -> quiesce::Result<()> {
//!     let orchestrator = OrchestratorBuilder::new(SiteProcessor)
//!         .workers(8)
//!         .with_checkpoint_path("./crawl.checkpoint")
//!         .build();
//!     orchestrator.start().await?;
//!     // ... later: everything uncompleted comes back as pending.
//!     let pending = orchestrator.stop().await?;
//!     orchestrator.persist()?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod checkpoint;
pub mod crawler;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod prelude;
pub mod queue;
pub mod stats;
pub mod token;

pub use builder::{OrchestratorBuilder, OrchestratorConfig};
pub use checkpoint::{load_checkpoint, save_checkpoint, CrawlCheckpoint};
pub use crawler::{CrawlOrchestrator, PageId, PageProcessor};
pub use error::{QuiesceError, Result};
pub use pipeline::{Envelope, PillPipeline, Producer};
pub use pool::{
    run_with_deadline, run_with_deadline_cancellable, PoolConfig, PoolHooks, PoolState,
    TaskContext, TaskHandle, TaskMeta, TaskOutcome, TrackingPool, WorkerPool,
};
pub use queue::WorkQueue;
pub use stats::{CrawlStats, StatsSnapshot};
pub use token::CancelToken;

pub use async_trait::async_trait;
