//! In-memory storage backend.
//!
//! Stores committed envelopes, recorded block hashes, and checkpoints in RAM.
//! Useful for testing and short-lived indexers that don't need persistence.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use mailindex_core::checkpoint::{Checkpoint, CursorStore};
use mailindex_core::error::IndexerError;
use mailindex_core::store::MailStore;
use mailindex_core::types::{BlockHash, MailEnvelope};

#[derive(Debug, Clone)]
struct StoredBlock {
    hash: BlockHash,
    envelopes: Vec<MailEnvelope>,
}

/// In-memory indexer storage.
///
/// All data is lost when the process exits. One lock guards every block so a
/// commit replaces a block's envelopes and hash together.
#[derive(Default)]
pub struct InMemoryStorage {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    blocks: Mutex<BTreeMap<u64, StoredBlock>>,
    commits: AtomicU64,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored envelopes, ordered by block then position.
    pub fn envelopes(&self) -> Vec<MailEnvelope> {
        self.blocks
            .lock()
            .unwrap()
            .values()
            .flat_map(|b| b.envelopes.iter().cloned())
            .collect()
    }

    /// Envelopes stored for one block, in position order.
    pub fn envelopes_at(&self, block_number: u64) -> Vec<MailEnvelope> {
        self.blocks
            .lock()
            .unwrap()
            .get(&block_number)
            .map(|b| b.envelopes.clone())
            .unwrap_or_default()
    }

    /// Envelopes addressed to `recipient`, in index order.
    pub fn envelopes_for(&self, recipient: &str) -> Vec<MailEnvelope> {
        self.envelopes()
            .into_iter()
            .filter(|e| e.recipient == recipient)
            .collect()
    }

    /// Total number of stored envelopes.
    pub fn envelope_count(&self) -> usize {
        self.blocks
            .lock()
            .unwrap()
            .values()
            .map(|b| b.envelopes.len())
            .sum()
    }

    /// Numbers of all blocks with a recorded commit.
    pub fn block_numbers(&self) -> Vec<u64> {
        self.blocks.lock().unwrap().keys().copied().collect()
    }

    /// Number of `commit` calls so far, including re-commits.
    pub fn commit_calls(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MailStore for InMemoryStorage {
    async fn commit(
        &self,
        block_number: u64,
        block_hash: &BlockHash,
        envelopes: &[MailEnvelope],
    ) -> Result<(), IndexerError> {
        self.blocks.lock().unwrap().insert(
            block_number,
            StoredBlock {
                hash: *block_hash,
                envelopes: envelopes.to_vec(),
            },
        );
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback_after(&self, block_number: u64) -> Result<(), IndexerError> {
        self.blocks
            .lock()
            .unwrap()
            .retain(|num, _| *num <= block_number);
        Ok(())
    }

    async fn rollback_all(&self) -> Result<(), IndexerError> {
        self.blocks.lock().unwrap().clear();
        Ok(())
    }

    async fn block_hash(&self, block_number: u64) -> Result<Option<BlockHash>, IndexerError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(&block_number)
            .map(|b| b.hash))
    }
}

#[async_trait]
impl CursorStore for InMemoryStorage {
    async fn load(&self, indexer_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.checkpoints.lock().unwrap().get(indexer_id).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(checkpoint.indexer_id.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, indexer_id: &str) -> Result<(), IndexerError> {
        self.checkpoints.lock().unwrap().remove(indexer_id);
        Ok(())
    }
}
