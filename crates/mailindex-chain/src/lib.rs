//! mailindex-chain — block fetcher, reorg-safe index loop, and builder.

pub mod builder;
pub mod fetcher;
pub mod index_loop;

pub use builder::IndexerBuilder;
pub use fetcher::{BlockFetcher, ChainClient, ChainError};
pub use index_loop::{IndexLoop, StepOutcome};
