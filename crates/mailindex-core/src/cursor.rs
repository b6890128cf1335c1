//! Indexer cursor — the last block that was fully and durably indexed.

use serde::{Deserialize, Serialize};

use crate::types::{BlockHash, BlockHeader};

/// The indexer's current position in the chain.
///
/// Owned by the index loop. It only moves forward after a block's envelopes
/// were committed downstream, and only moves backward during reorg recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Last indexed block number.
    pub block_number: u64,
    /// Hash of the last indexed block.
    pub block_hash: BlockHash,
}

impl Cursor {
    pub fn new(block_number: u64, block_hash: BlockHash) -> Self {
        Self {
            block_number,
            block_hash,
        }
    }

    /// Returns the next block to index (cursor + 1).
    pub fn next_block(&self) -> u64 {
        self.block_number + 1
    }
}

impl From<&BlockHeader> for Cursor {
    fn from(header: &BlockHeader) -> Self {
        Self::new(header.number, header.hash)
    }
}
