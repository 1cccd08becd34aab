//! # Checkpoint Module
//!
//! Persists an orchestrator's pending work across process restarts.
//!
//! ## Overview
//!
//! A [`CrawlCheckpoint`] captures the two sets the orchestrator needs to
//! resume a crawl: the identities still owed processing and the identities
//! already dispatched. Serialization uses MessagePack; saves write a `.tmp`
//! sibling first and rename it into place so a crash never leaves a torn
//! checkpoint behind.
//!
//! Restoring a checkpoint and saving it again is an identity on the set of
//! uncompleted identities.
//!
//! ## Example
//!
//! ```rust,ignore
//! use quiesce::checkpoint::{load_checkpoint, save_checkpoint};
//!
//! let pending = orchestrator.stop().await?;
//! orchestrator.persist()?;
//! // ... later, in a fresh process:
//! let checkpoint = load_checkpoint(&path)?;
//! let orchestrator = CrawlOrchestrator::from_checkpoint(processor, config, checkpoint);
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crawler::PageId;
use crate::error::{QuiesceError, Result};

/// A snapshot of the orchestrator's resumable state.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrawlCheckpoint {
    /// Identities awaiting processing.
    pub pending: HashSet<PageId>,
    /// Identities ever dispatched, used to dedupe rediscoveries.
    pub seen: HashSet<PageId>,
}

/// Serializes `checkpoint` to `path`, atomically.
pub fn save_checkpoint(path: &Path, checkpoint: &CrawlCheckpoint) -> Result<()> {
    info!(
        path = %path.display(),
        pending = checkpoint.pending.len(),
        "saving checkpoint"
    );

    let encoded = rmp_serde::to_vec(checkpoint).map_err(|e| {
        QuiesceError::Domain(anyhow::anyhow!("failed to serialize checkpoint: {e}"))
    })?;

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, encoded).map_err(|e| {
        QuiesceError::Domain(anyhow::anyhow!(
            "failed to write checkpoint to temporary file: {e}"
        ))
    })?;
    fs::rename(&tmp_path, path).map_err(|e| {
        QuiesceError::Domain(anyhow::anyhow!(
            "failed to rename temporary checkpoint file: {e}"
        ))
    })?;

    info!("checkpoint saved");
    Ok(())
}

/// Reads a checkpoint previously written by [`save_checkpoint`].
pub fn load_checkpoint(path: &Path) -> Result<CrawlCheckpoint> {
    let bytes = fs::read(path).map_err(|e| {
        QuiesceError::Domain(anyhow::anyhow!("failed to read checkpoint file: {e}"))
    })?;
    rmp_serde::from_slice(&bytes).map_err(|e| {
        QuiesceError::Domain(anyhow::anyhow!("failed to decode checkpoint: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.checkpoint");

        let checkpoint = CrawlCheckpoint {
            pending: ["B", "C"].into_iter().map(String::from).collect(),
            seen: ["A", "B", "C"].into_iter().map(String::from).collect(),
        };
        save_checkpoint(&path, &checkpoint).unwrap();

        let restored = load_checkpoint(&path).unwrap();
        assert_eq!(restored, checkpoint);
        // No temporary file left behind.
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn missing_file_is_a_domain_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.checkpoint");
        assert!(matches!(
            load_checkpoint(&missing),
            Err(QuiesceError::Domain(_))
        ));
    }
}
