//! Block tracker — a sliding window of recently indexed block headers.
//!
//! The window is the in-memory part of the parent-hash chain. It is indexed
//! by block number and holds at most `window_size` headers, enough to cover
//! the maximum reorg depth without asking the store.

use std::collections::VecDeque;

use crate::cursor::Cursor;
use crate::types::{BlockHash, BlockHeader};

/// Tracks the last N indexed block headers.
pub struct BlockTracker {
    /// Oldest first; numbers are contiguous.
    window: VecDeque<BlockHeader>,
    window_size: usize,
}

impl BlockTracker {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size.min(1024)),
            window_size,
        }
    }

    /// Append a header that extends the current head.
    ///
    /// Returns the header back if it does not build on the head.
    pub fn push(&mut self, header: BlockHeader) -> Result<(), BlockHeader> {
        if let Some(head) = self.window.back() {
            if !header.extends(head) {
                return Err(header);
            }
        }
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(header);
        Ok(())
    }

    /// Reset the window to a single entry for `cursor` (used on resume).
    ///
    /// The parent hash of a seeded entry is unknown and left zeroed.
    pub fn seed(&mut self, cursor: &Cursor) {
        self.window.clear();
        self.window.push_back(BlockHeader {
            number: cursor.block_number,
            hash: cursor.block_hash,
            parent_hash: BlockHash::ZERO,
        });
    }

    pub fn head(&self) -> Option<&BlockHeader> {
        self.window.back()
    }

    /// Returns a header by number if it's in the window.
    pub fn get(&self, number: u64) -> Option<&BlockHeader> {
        let first = self.window.front()?.number;
        let idx = number.checked_sub(first)?;
        self.window.get(usize::try_from(idx).ok()?)
    }

    /// Recorded hash for `number`, if it's in the window.
    pub fn hash_at(&self, number: u64) -> Option<BlockHash> {
        self.get(number).map(|h| h.hash)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Discard everything after `block_number`.
    pub fn rewind_to(&mut self, block_number: u64) {
        while let Some(back) = self.window.back() {
            if back.number > block_number {
                self.window.pop_back();
            } else {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}
