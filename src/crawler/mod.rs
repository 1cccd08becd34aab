//! # Crawler Module
//!
//! The domain-level use of the pool machinery: a restartable crawl.
//!
//! ## Overview
//!
//! The crawler module ties the tracking pool to a [`PageProcessor`]
//! collaborator. The orchestrator dispatches one task per page, crawl tasks
//! discover and submit successors through the shared pool handle, and an
//! abrupt stop folds everything that did not complete (queued-but-unstarted
//! and started-but-cancelled alike) back into the pending set for a later
//! resume.
//!
//! ## Key Components
//!
//! - **CrawlOrchestrator**: owns the pending/seen sets and the pool lifecycle
//! - **PageProcessor**: the external collaborator that fetches and parses

mod orchestrator;
mod processor;

pub use orchestrator::CrawlOrchestrator;
pub use processor::{PageId, PageProcessor};
