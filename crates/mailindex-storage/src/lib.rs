//! mailindex-storage — pluggable storage backends for MailIndex.
//!
//! Every backend implements both [`MailStore`](mailindex_core::MailStore)
//! (verified envelopes + recorded block hashes) and
//! [`CursorStore`](mailindex_core::CursorStore) (the indexer checkpoint).
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;
