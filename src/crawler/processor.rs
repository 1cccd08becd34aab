//! The page-processing collaborator consumed by the orchestrator.

use async_trait::async_trait;

use crate::error::Result;

/// Identity of a unit of crawl work: a URL, a file path, a document key.
///
/// The orchestrator only compares, stores, and hands these back; their
/// meaning belongs to the [`PageProcessor`].
pub type PageId = String;

/// External collaborator that processes one page and discovers successors.
///
/// # Example
///
/// ```rust,ignore
/// use quiesce::{async_trait, PageId, PageProcessor};
///
/// struct SiteProcessor;
///
/// #[async_trait]
/// impl PageProcessor for SiteProcessor {
///     fn seeds(&self) -> Vec<PageId> {
///         vec!["https://example.com/".into()]
///     }
///
///     async fn process_page(&self, id: &PageId) -> quiesce::Result<Vec<PageId>> {
///         let body = fetch(id).await?;
///         Ok(extract_links(&body))
///     }
/// }
/// ```
#[async_trait]
pub trait PageProcessor: Send + Sync + 'static {
    /// The identities a fresh crawl begins from.
    fn seeds(&self) -> Vec<PageId> {
        Vec::new()
    }

    /// Processes one page and returns newly discovered identities.
    ///
    /// Failures are domain errors: the orchestrator logs them and requeues
    /// the identity instead of losing it.
    async fn process_page(&self, id: &PageId) -> Result<Vec<PageId>>;
}
