//! Downstream mail store contract.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{BlockHash, MailEnvelope};

/// Receives verified envelopes from the index loop.
///
/// `commit` must be idempotent per block number: committing the same block
/// twice (e.g. after a crash between commit and cursor save) replaces the
/// earlier write rather than duplicating it. Envelopes are keyed by
/// `(block_number, position)`.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Durably record `envelopes` for a block, along with the block's hash.
    async fn commit(
        &self,
        block_number: u64,
        block_hash: &BlockHash,
        envelopes: &[MailEnvelope],
    ) -> Result<(), IndexerError>;

    /// Delete everything recorded for blocks after `block_number`.
    ///
    /// Called during reorg recovery with the common ancestor's number.
    async fn rollback_after(&self, block_number: u64) -> Result<(), IndexerError>;

    /// Delete everything. Used when a reorg replaced the whole indexed range.
    async fn rollback_all(&self) -> Result<(), IndexerError>;

    /// The hash recorded by the last commit of `block_number`, if any.
    async fn block_hash(&self, block_number: u64) -> Result<Option<BlockHash>, IndexerError>;
}
