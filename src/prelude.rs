//! A "prelude" for users of the `quiesce` crate.
//!
//! This prelude re-exports the most commonly used traits, structs, and
//! macros so that they can be easily imported.
//!
//! # Example
//!
//! ```
//! use quiesce::prelude::*;
//! ```

pub use crate::{
    // Core structs
    CancelToken,
    CrawlOrchestrator,
    OrchestratorBuilder,
    PillPipeline,
    TrackingPool,
    WorkerPool,
    WorkQueue,
    // Core traits
    PageProcessor,
    // Essential re-export for trait implementation
    async_trait,
    // Error taxonomy
    QuiesceError,
    Result,
};
