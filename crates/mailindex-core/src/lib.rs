//! mailindex-core — foundation for the reorg-safe mail indexer.
//!
//! # Architecture
//!
//! ```text
//! IndexLoop (mailindex-chain)
//!     ├── BlockFetcher       (latest height, blocks by number, retry/backoff)
//!     ├── ReorgDetector      (parent hash check, common-ancestor walk)
//!     ├── BlockTracker       (recent headers, indexed by number)
//!     ├── extract_envelopes  (payload → MailEnvelope records)
//!     ├── VerificationGate   (Ed25519 verify, parallel per block)
//!     ├── MailStore          (downstream commit, idempotent per block)
//!     └── CheckpointManager  (cursor persistence for crash recovery)
//! ```

pub mod checkpoint;
pub mod cursor;
pub mod envelope;
pub mod error;
pub mod gate;
pub mod indexer;
pub mod reorg;
pub mod retry;
pub mod signature;
pub mod store;
pub mod tracker;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CursorStore};
pub use cursor::Cursor;
pub use envelope::{extract_envelopes, EnvelopeError, Extraction};
pub use error::IndexerError;
pub use gate::{GateOutcome, VerificationGate};
pub use indexer::{IndexStats, IndexerConfig, IndexerState};
pub use reorg::{AncestorSource, RecordedChain, RecordedHashes, ReorgDetector, ReorgEvent};
pub use retry::{RetryConfig, RetryPolicy};
pub use signature::{CryptoError, KeyPair, PrivateKey, PublicKey, Signature};
pub use store::MailStore;
pub use tracker::BlockTracker;
pub use types::{Block, BlockHash, BlockHeader, MailEnvelope};
