//! Fluent builder API for creating mail indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use mailindex_chain::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .id("inbox")
//!     .start_block(19_000_000)
//!     .max_reorg_depth(32)
//!     .poll_interval_ms(1_000)
//!     .build_config();
//! ```

use std::sync::Arc;

use mailindex_core::checkpoint::CursorStore;
use mailindex_core::error::IndexerError;
use mailindex_core::indexer::IndexerConfig;
use mailindex_core::retry::RetryConfig;
use mailindex_core::store::MailStore;

use crate::fetcher::ChainClient;
use crate::index_loop::IndexLoop;

/// Fluent builder for `IndexerConfig`.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Set the indexer ID (used as the checkpoint key).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the first block indexed when no checkpoint exists.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Set the polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set how many indexed blocks a reorg may roll back.
    pub fn max_reorg_depth(mut self, depth: u64) -> Self {
        self.config.max_reorg_depth = depth;
        self
    }

    /// Set how many consecutive failed poll rounds are tolerated.
    pub fn max_consecutive_fetch_failures(mut self, n: u32) -> Self {
        self.config.max_consecutive_fetch_failures = n;
        self
    }

    pub fn verify_workers(mut self, n: usize) -> Self {
        self.config.verify_workers = n;
        self
    }

    /// Set the retry ceiling for a single chain call.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    /// Replace the whole retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Validate the configuration and create an index loop.
    pub fn build<C: ChainClient>(
        self,
        client: C,
        store: Arc<dyn MailStore>,
        cursor_store: Arc<dyn CursorStore>,
    ) -> Result<IndexLoop<C>, IndexerError> {
        IndexLoop::new(self.config, client, store, cursor_store)
    }

    /// Like [`build`](Self::build), for a backend that stores both mail and
    /// the cursor.
    pub fn build_with_storage<C, S>(
        self,
        client: C,
        storage: Arc<S>,
    ) -> Result<IndexLoop<C>, IndexerError>
    where
        C: ChainClient,
        S: MailStore + CursorStore + 'static,
    {
        self.build(client, storage.clone(), storage)
    }
}
