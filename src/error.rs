//! Error taxonomy shared across the crate.
//!
//! Every fallible operation in `quiesce` reports one of a small set of
//! outcomes. The distinction between them matters to callers:
//!
//! - [`QuiesceError::Cancelled`]: a cooperative cancellation signal was
//!   observed. Never fatal for a pool; the caller may retry or give up.
//! - [`QuiesceError::Timeout`]: a deadline expired. The associated task has
//!   been cancelled as a side effect.
//! - [`QuiesceError::Rejected`]: a submission arrived after shutdown began.
//!   The caller must stop producing.
//! - [`QuiesceError::Closed`]: a queue was closed and drained.
//! - [`QuiesceError::IllegalState`]: API misuse, a programming bug rather
//!   than a recoverable outcome.
//! - [`QuiesceError::Domain`]: a failure raised by a task body or page
//!   processor. Surfaced only through the owning handle; never terminates
//!   other tasks.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, QuiesceError>;

/// The error outcomes of the cancellation and shutdown machinery.
#[derive(Debug, Error)]
pub enum QuiesceError {
    /// A cooperative cancellation signal was observed.
    #[error("operation cancelled")]
    Cancelled,

    /// A deadline expired before the operation completed.
    #[error("deadline elapsed")]
    Timeout,

    /// The pool is no longer accepting submissions.
    #[error("submission rejected: pool is shutting down")]
    Rejected,

    /// The queue has been closed and fully drained.
    #[error("queue closed")]
    Closed,

    /// The API was used outside its documented lifecycle.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// A failure raised by a task body or an external collaborator.
    #[error(transparent)]
    Domain(#[from] anyhow::Error),
}

impl QuiesceError {
    /// Whether this outcome is a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QuiesceError::Cancelled)
    }
}
