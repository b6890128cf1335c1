//! Checkpoint manager — persists the cursor for crash recovery.
//!
//! A checkpoint stores the last fully indexed block number and hash. On
//! restart, the indexer resumes from the last checkpoint rather than
//! re-indexing from the start block.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::error::IndexerError;

/// A persisted cursor for one indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique indexer identifier.
    pub indexer_id: String,
    /// Last indexed block number.
    pub block_number: u64,
    /// Last indexed block hash (`0x…`).
    pub block_hash: String,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// Trait for storing and loading cursor checkpoints.
///
/// Implementations live in `mailindex-storage` (`InMemoryStorage`,
/// `SqliteStorage`).
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the checkpoint for `indexer_id`, if one was saved.
    async fn load(&self, indexer_id: &str) -> Result<Option<Checkpoint>, IndexerError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError>;

    /// Delete a checkpoint (e.g. when resetting an indexer).
    async fn delete(&self, indexer_id: &str) -> Result<(), IndexerError>;
}

/// Converts between the loop's [`Cursor`] and stored [`Checkpoint`]s.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CursorStore>,
    indexer_id: String,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CursorStore>, indexer_id: impl Into<String>) -> Self {
        Self {
            store,
            indexer_id: indexer_id.into(),
        }
    }

    /// Load the saved cursor (`None` if the indexer never committed a block).
    pub async fn load(&self) -> Result<Option<Cursor>, IndexerError> {
        let Some(cp) = self.store.load(&self.indexer_id).await? else {
            return Ok(None);
        };
        let hash = cp.block_hash.parse().map_err(|e| {
            IndexerError::Storage(format!(
                "corrupt checkpoint hash {:?} for '{}': {e}",
                cp.block_hash, self.indexer_id
            ))
        })?;
        Ok(Some(Cursor::new(cp.block_number, hash)))
    }

    /// Persist `cursor`.
    pub async fn save(&self, cursor: &Cursor) -> Result<(), IndexerError> {
        let cp = Checkpoint {
            indexer_id: self.indexer_id.clone(),
            block_number: cursor.block_number,
            block_hash: cursor.block_hash.to_hex(),
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.store.save(cp).await
    }

    /// Forget the saved cursor; the next run starts from the start block.
    pub async fn clear(&self) -> Result<(), IndexerError> {
        self.store.delete(&self.indexer_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::types::BlockHash;

    #[derive(Default)]
    struct MapStore(Mutex<HashMap<String, Checkpoint>>);

    #[async_trait]
    impl CursorStore for MapStore {
        async fn load(&self, indexer_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
            Ok(self.0.lock().unwrap().get(indexer_id).cloned())
        }

        async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
            self.0
                .lock()
                .unwrap()
                .insert(checkpoint.indexer_id.clone(), checkpoint);
            Ok(())
        }

        async fn delete(&self, indexer_id: &str) -> Result<(), IndexerError> {
            self.0.lock().unwrap().remove(indexer_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn cursor_roundtrip() {
        let store = Arc::new(MapStore::default());
        let mgr = CheckpointManager::new(store.clone(), "mail");

        assert!(mgr.load().await.unwrap().is_none());

        let cursor = Cursor::new(1000, BlockHash([0xab; 32]));
        mgr.save(&cursor).await.unwrap();
        assert_eq!(mgr.load().await.unwrap(), Some(cursor));

        let raw = store.load("mail").await.unwrap().unwrap();
        assert_eq!(raw.block_hash, format!("0x{}", "ab".repeat(32)));
        assert!(raw.updated_at > 0);

        mgr.clear().await.unwrap();
        assert!(mgr.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_hash_is_a_storage_error() {
        let store = Arc::new(MapStore::default());
        store
            .save(Checkpoint {
                indexer_id: "mail".into(),
                block_number: 5,
                block_hash: "not-hex".into(),
                updated_at: 0,
            })
            .await
            .unwrap();

        let err = CheckpointManager::new(store, "mail").load().await.unwrap_err();
        assert!(matches!(err, IndexerError::Storage(_)));
    }
}
