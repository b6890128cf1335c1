//! Indexer configuration, state, and statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::retry::RetryConfig;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Unique name for this indexer (used as the checkpoint key).
    pub id: String,
    /// First block to index when no checkpoint exists.
    pub start_block: u64,
    /// Polling interval while caught up (milliseconds).
    pub poll_interval_ms: u64,
    /// Maximum number of indexed blocks a reorg may roll back.
    pub max_reorg_depth: u64,
    /// Consecutive `FetchFailed` poll rounds tolerated before stopping.
    pub max_consecutive_fetch_failures: u32,
    /// Blocking workers used to verify one block's envelopes.
    pub verify_workers: usize,
    /// Backoff for transient chain errors.
    pub retry: RetryConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: "mailindex".into(),
            start_block: 0,
            poll_interval_ms: 2000,
            max_reorg_depth: 64,
            max_consecutive_fetch_failures: 5,
            verify_workers: 4,
            retry: RetryConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, IndexerError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| IndexerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.id.is_empty() {
            return Err(IndexerError::Config("id must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(IndexerError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.max_reorg_depth == 0 {
            return Err(IndexerError::Config("max_reorg_depth must be > 0".into()));
        }
        if self.verify_workers == 0 {
            return Err(IndexerError::Config("verify_workers must be > 0".into()));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(IndexerError::Config("retry.multiplier must be >= 1.0".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// State of the index loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Waiting for the next poll tick.
    Idle,
    /// Asking the chain for its latest height.
    Polling,
    /// Fetching the block after the cursor.
    Fetching,
    /// Comparing the fetched block's parent with the cursor.
    ReorgCheck,
    /// Rolling the cursor back to the common ancestor.
    ReorgRecovery,
    Extracting,
    Verifying,
    /// Writing envelopes downstream and advancing the cursor.
    Committing,
    /// Terminated (shutdown or fatal error).
    Stopped,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Polling => write!(f, "polling"),
            Self::Fetching => write!(f, "fetching"),
            Self::ReorgCheck => write!(f, "reorg-check"),
            Self::ReorgRecovery => write!(f, "reorg-recovery"),
            Self::Extracting => write!(f, "extracting"),
            Self::Verifying => write!(f, "verifying"),
            Self::Committing => write!(f, "committing"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Running counters for one index loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub blocks_indexed: u64,
    pub envelopes_committed: u64,
    pub envelopes_rejected: u64,
    pub envelopes_malformed: u64,
    pub reorgs: u64,
}
