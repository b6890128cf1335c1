//! Block fetcher over the chain-access capability.
//!
//! The capability has exactly two operations, [`ChainClient::latest_block_number`]
//! and [`ChainClient::block_by_number`]. A live RPC client and a test double are
//! interchangeable implementations. [`BlockFetcher`] adds bounded exponential
//! backoff for transient failures and performs no caching.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use mailindex_core::error::IndexerError;
use mailindex_core::reorg::AncestorSource;
use mailindex_core::retry::RetryPolicy;
use mailindex_core::types::{Block, BlockHeader};

/// Errors returned by a chain-access implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Network failure or timeout. Worth retrying.
    #[error("transient chain error: {0}")]
    Transient(String),

    /// The requested block does not exist (yet).
    #[error("block {number} not found")]
    NotFound { number: u64 },

    /// The node answered with something unusable.
    #[error("malformed chain response: {0}")]
    Malformed(String),
}

impl ChainError {
    /// Returns `true` if this error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// The chain-access capability consumed by the indexer.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64, ChainError>;
    async fn block_by_number(&self, number: u64) -> Result<Block, ChainError>;
}

#[async_trait]
impl<T: ChainClient + ?Sized> ChainClient for Arc<T> {
    async fn latest_block_number(&self) -> Result<u64, ChainError> {
        (**self).latest_block_number().await
    }

    async fn block_by_number(&self, number: u64) -> Result<Block, ChainError> {
        (**self).block_by_number(number).await
    }
}

/// Wraps a [`ChainClient`] and retries transient failures.
pub struct BlockFetcher<C> {
    client: C,
    retry: RetryPolicy,
}

impl<C: ChainClient> BlockFetcher<C> {
    pub fn new(client: C, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch the current chain head block number.
    pub async fn latest_block_number(&self) -> Result<u64, IndexerError> {
        self.with_retry("latest_block_number", || self.client.latest_block_number())
            .await
    }

    /// Fetch a block by number.
    ///
    /// A block whose number differs from the one requested is treated as a
    /// malformed response.
    pub async fn block_by_number(&self, number: u64) -> Result<Block, IndexerError> {
        let block = self
            .with_retry("block_by_number", || self.client.block_by_number(number))
            .await?;
        if block.number != number {
            return Err(IndexerError::PermanentFetch(format!(
                "asked for block {number}, node returned block {}",
                block.number
            )));
        }
        Ok(block)
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            op,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying chain call"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(op, attempt, error = %e, "max retries exceeded");
                        return Err(IndexerError::FetchFailed {
                            attempts: attempt,
                            reason: e.to_string(),
                        });
                    }
                },
                Err(ChainError::NotFound { number }) => {
                    return Err(IndexerError::BlockNotFound { number })
                }
                Err(e) => return Err(IndexerError::PermanentFetch(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl<C: ChainClient> AncestorSource for BlockFetcher<C> {
    async fn canonical_header(&self, number: u64) -> Result<BlockHeader, IndexerError> {
        Ok(self.block_by_number(number).await?.header())
    }
}
