//! Error types for the mailindex pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("fetch failed after {attempts} attempts: {reason}")]
    FetchFailed { attempts: u32, reason: String },

    #[error("permanent fetch error: {0}")]
    PermanentFetch(String),

    #[error("block {number} not found")]
    BlockNotFound { number: u64 },

    #[error("reorg detected at block {detected_at} exceeds maximum depth {max_depth}")]
    ReorgTooDeep { detected_at: u64, max_depth: u64 },

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("indexer cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the loop may try again on the next poll tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchFailed { .. })
    }

    /// Returns `true` if the error must stop the loop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::FetchFailed { .. } | Self::Cancelled)
    }
}
