//! SQLite storage backend for MailIndex.
//!
//! Persists checkpoints, verified envelopes, and recorded block hashes to a
//! single SQLite file. Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use mailindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./mail.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use mailindex_core::checkpoint::{Checkpoint, CursorStore};
use mailindex_core::error::IndexerError;
use mailindex_core::store::MailStore;
use mailindex_core::types::{BlockHash, MailEnvelope};

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed storage for checkpoints, envelopes, and block hashes.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./mail.db"`) or a full
    /// SQLite URL (`"sqlite:./mail.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `sqlite::memory:` sees its own database, so the
    /// pool is pinned to a single connection that is never recycled.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                indexer_id   TEXT    PRIMARY KEY,
                block_number INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        // One row per committed block, including blocks with no mail.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS block_hashes (
                block_number INTEGER PRIMARY KEY,
                block_hash   TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS envelopes (
                block_number INTEGER NOT NULL,
                position     INTEGER NOT NULL,
                sender       BLOB    NOT NULL,
                recipient    TEXT    NOT NULL,
                message      BLOB    NOT NULL,
                signature    BLOB    NOT NULL,
                PRIMARY KEY (block_number, position)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_envelopes_recipient ON envelopes (recipient);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    // ─── Envelope queries ───────────────────────────────────────────────────────

    /// Envelopes committed for one block, in position order.
    pub async fn envelopes_for_block(
        &self,
        block_number: u64,
    ) -> Result<Vec<MailEnvelope>, IndexerError> {
        let rows = sqlx::query(
            "SELECT block_number, position, sender, recipient, message, signature
             FROM envelopes WHERE block_number = ? ORDER BY position",
        )
        .bind(block_number as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(row_to_envelope).collect()
    }

    /// Every envelope addressed to `recipient`, ordered by block + position.
    pub async fn envelopes_for_recipient(
        &self,
        recipient: &str,
    ) -> Result<Vec<MailEnvelope>, IndexerError> {
        let rows = sqlx::query(
            "SELECT block_number, position, sender, recipient, message, signature
             FROM envelopes WHERE recipient = ? ORDER BY block_number, position",
        )
        .bind(recipient)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(row_to_envelope).collect()
    }

    /// Total number of committed envelopes.
    pub async fn envelope_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM envelopes")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

fn row_to_envelope(row: &SqliteRow) -> Result<MailEnvelope, IndexerError> {
    let block_number = row.get::<i64, _>("block_number") as u64;
    let sender: Vec<u8> = row.get("sender");
    let signature: Vec<u8> = row.get("signature");

    Ok(MailEnvelope {
        sender: sender.try_into().map_err(|_| {
            IndexerError::Storage(format!("corrupt sender key in block {block_number}"))
        })?,
        recipient: row.get("recipient"),
        message: row.get("message"),
        signature: signature.try_into().map_err(|_| {
            IndexerError::Storage(format!("corrupt signature in block {block_number}"))
        })?,
        block_number,
        position: row.get::<i64, _>("position") as u32,
    })
}

// ─── MailStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl MailStore for SqliteStorage {
    async fn commit(
        &self,
        block_number: u64,
        block_hash: &BlockHash,
        envelopes: &[MailEnvelope],
    ) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        // Replacing the block keeps a re-commit after a crash idempotent.
        sqlx::query("DELETE FROM envelopes WHERE block_number = ?")
            .bind(block_number as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        for env in envelopes {
            sqlx::query(
                "INSERT INTO envelopes (block_number, position, sender, recipient, message, signature)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(block_number as i64)
            .bind(env.position as i64)
            .bind(&env.sender[..])
            .bind(&env.recipient)
            .bind(&env.message)
            .bind(&env.signature[..])
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        sqlx::query("INSERT OR REPLACE INTO block_hashes (block_number, block_hash) VALUES (?, ?)")
            .bind(block_number as i64)
            .bind(block_hash.to_hex())
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        debug!(block = block_number, envelopes = envelopes.len(), "block committed");
        Ok(())
    }

    async fn rollback_after(&self, block_number: u64) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("DELETE FROM envelopes WHERE block_number > ?")
            .bind(block_number as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        sqlx::query("DELETE FROM block_hashes WHERE block_number > ?")
            .bind(block_number as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        debug!(block_number, "rolled back storage");
        Ok(())
    }

    async fn rollback_all(&self) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("DELETE FROM envelopes")
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        sqlx::query("DELETE FROM block_hashes")
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;

        debug!("cleared all indexed mail");
        Ok(())
    }

    async fn block_hash(&self, block_number: u64) -> Result<Option<BlockHash>, IndexerError> {
        let row = sqlx::query("SELECT block_hash FROM block_hashes WHERE block_number = ?")
            .bind(block_number as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            None => Ok(None),
            Some(r) => {
                let hex: String = r.get("block_hash");
                hex.parse::<BlockHash>().map(Some).map_err(|e| {
                    IndexerError::Storage(format!("corrupt hash for block {block_number}: {e}"))
                })
            }
        }
    }
}

// ─── CursorStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl CursorStore for SqliteStorage {
    async fn load(&self, indexer_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT indexer_id, block_number, block_hash, updated_at
             FROM checkpoints WHERE indexer_id = ?",
        )
        .bind(indexer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| Checkpoint {
            indexer_id: r.get("indexer_id"),
            block_number: r.get::<i64, _>("block_number") as u64,
            block_hash: r.get("block_hash"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints
             (indexer_id, block_number, block_hash, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&checkpoint.indexer_id)
        .bind(checkpoint.block_number as i64)
        .bind(&checkpoint.block_hash)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(
            indexer_id = %checkpoint.indexer_id,
            block = checkpoint.block_number,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, indexer_id: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM checkpoints WHERE indexer_id = ?")
            .bind(indexer_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
