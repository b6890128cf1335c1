//! Reorg detection and common-ancestor search.
//!
//! A block at `cursor + 1` whose parent hash differs from the cursor's hash
//! means the chain was reorganized. The detector then walks backward one
//! block at a time, re-fetching the canonical block at each height and
//! comparing its hash with the hash recorded when that height was indexed.
//! The first height where they agree is the common ancestor.

use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::error::IndexerError;
use crate::store::MailStore;
use crate::tracker::BlockTracker;
use crate::types::{BlockHash, BlockHeader};

/// Source of canonical block headers (the live chain).
#[async_trait]
pub trait AncestorSource: Send + Sync {
    async fn canonical_header(&self, number: u64) -> Result<BlockHeader, IndexerError>;
}

/// Source of hashes recorded at index time.
#[async_trait]
pub trait RecordedHashes: Send + Sync {
    async fn recorded_hash(&self, number: u64) -> Result<Option<BlockHash>, IndexerError>;
}

/// Recorded hashes from the in-memory window, falling back to the store.
pub struct RecordedChain<'a> {
    pub tracker: &'a BlockTracker,
    pub store: &'a dyn MailStore,
}

#[async_trait]
impl<'a> RecordedHashes for RecordedChain<'a> {
    async fn recorded_hash(&self, number: u64) -> Result<Option<BlockHash>, IndexerError> {
        if let Some(hash) = self.tracker.hash_at(number) {
            return Ok(Some(hash));
        }
        self.store.block_hash(number).await
    }
}

/// Describes a detected chain reorganization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgEvent {
    /// Number of the block whose parent hash did not match.
    pub detected_at: u64,
    /// Where the cursor must roll back to. `None` means every indexed block
    /// was replaced and indexing restarts at the start block.
    pub ancestor: Option<Cursor>,
    /// Number of indexed blocks rolled back.
    pub depth: u64,
}

/// Detects reorganizations and finds the common ancestor.
#[derive(Debug, Clone)]
pub struct ReorgDetector {
    max_depth: u64,
    start_block: u64,
}

impl ReorgDetector {
    pub fn new(max_depth: u64, start_block: u64) -> Self {
        Self {
            max_depth,
            start_block,
        }
    }

    /// Returns `true` if `block` extends `cursor` without a reorg.
    pub fn check(&self, cursor: &Cursor, block: &BlockHeader) -> bool {
        block.parent_hash == cursor.block_hash
    }

    /// Walk back from `mismatched.number - 1` to the newest height whose
    /// canonical hash still matches the recorded one.
    ///
    /// Fails with [`IndexerError::ReorgTooDeep`] when more than `max_depth`
    /// indexed blocks would have to be dropped, or when a height inside the
    /// walk has no recorded hash to compare against.
    pub async fn find_common_ancestor<S, R>(
        &self,
        chain: &S,
        recorded: &R,
        mismatched: &BlockHeader,
    ) -> Result<ReorgEvent, IndexerError>
    where
        S: AncestorSource + ?Sized,
        R: RecordedHashes + ?Sized,
    {
        let detected_at = mismatched.number;
        let too_deep = || IndexerError::ReorgTooDeep {
            detected_at,
            max_depth: self.max_depth,
        };
        let tip = detected_at.saturating_sub(1);

        tracing::warn!(
            at = detected_at,
            parent = %mismatched.parent_hash,
            "Reorg detected, searching for common ancestor"
        );

        let mut number = tip;
        loop {
            let depth = tip - number;
            let Some(recorded_hash) = recorded.recorded_hash(number).await? else {
                tracing::error!(block = number, "no recorded hash to compare against");
                return Err(too_deep());
            };

            let canonical = chain.canonical_header(number).await?;
            if canonical.hash == recorded_hash {
                tracing::info!(ancestor = number, depth, "Found common ancestor");
                return Ok(ReorgEvent {
                    detected_at,
                    ancestor: Some(Cursor::new(number, recorded_hash)),
                    depth,
                });
            }

            // `number` itself was replaced.
            if depth + 1 > self.max_depth {
                tracing::error!(
                    at = detected_at,
                    max_depth = self.max_depth,
                    "Reorg deeper than allowed"
                );
                return Err(too_deep());
            }
            if number <= self.start_block {
                tracing::warn!(
                    start_block = self.start_block,
                    "Reorg replaced every indexed block"
                );
                return Ok(ReorgEvent {
                    detected_at,
                    ancestor: None,
                    depth: depth + 1,
                });
            }
            number -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn h(branch: u8, n: u64) -> BlockHash {
        let mut b = [branch; 32];
        b[24..].copy_from_slice(&n.to_be_bytes());
        BlockHash(b)
    }

    /// Canonical chain: branch `b'a'` up to and including `fork`, then `b'b'`.
    struct Chain {
        fork: u64,
        fetches: AtomicU32,
    }

    impl Chain {
        fn hash(&self, n: u64) -> BlockHash {
            if n <= self.fork {
                h(b'a', n)
            } else {
                h(b'b', n)
            }
        }
    }

    #[async_trait]
    impl AncestorSource for Chain {
        async fn canonical_header(&self, number: u64) -> Result<BlockHeader, IndexerError> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            Ok(BlockHeader {
                number,
                hash: self.hash(number),
                parent_hash: self.hash(number.saturating_sub(1)),
            })
        }
    }

    /// Hashes recorded while indexing branch `a` over `from..=to`.
    struct Recorded(HashMap<u64, BlockHash>);

    impl Recorded {
        fn branch_a(from: u64, to: u64) -> Self {
            Self((from..=to).map(|n| (n, h(b'a', n))).collect())
        }
    }

    #[async_trait]
    impl RecordedHashes for Recorded {
        async fn recorded_hash(&self, number: u64) -> Result<Option<BlockHash>, IndexerError> {
            Ok(self.0.get(&number).copied())
        }
    }

    fn chain(fork: u64) -> Chain {
        Chain {
            fork,
            fetches: AtomicU32::new(0),
        }
    }

    fn mismatched(chain: &Chain, number: u64) -> BlockHeader {
        BlockHeader {
            number,
            hash: chain.hash(number),
            parent_hash: chain.hash(number - 1),
        }
    }

    #[test]
    fn check_matches_parent_hash() {
        let det = ReorgDetector::new(8, 0);
        let cursor = Cursor::new(10, h(b'a', 10));
        let good = BlockHeader {
            number: 11,
            hash: h(b'a', 11),
            parent_hash: h(b'a', 10),
        };
        let bad = BlockHeader {
            parent_hash: h(b'b', 10),
            ..good.clone()
        };
        assert!(det.check(&cursor, &good));
        assert!(!det.check(&cursor, &bad));
    }

    #[tokio::test]
    async fn finds_ancestor_two_blocks_back() {
        let det = ReorgDetector::new(8, 0);
        let chain = chain(8); // 9 and 10 replaced
        let recorded = Recorded::branch_a(0, 10);

        let event = det
            .find_common_ancestor(&chain, &recorded, &mismatched(&chain, 11))
            .await
            .unwrap();

        assert_eq!(event.detected_at, 11);
        assert_eq!(event.ancestor, Some(Cursor::new(8, h(b'a', 8))));
        assert_eq!(event.depth, 2);
        assert_eq!(chain.fetches.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn stale_parent_with_matching_tip_is_depth_zero() {
        let det = ReorgDetector::new(8, 0);
        let chain = chain(100); // nothing replaced yet
        let recorded = Recorded::branch_a(0, 10);
        let odd = BlockHeader {
            number: 11,
            hash: h(b'z', 11),
            parent_hash: h(b'z', 10),
        };

        let event = det.find_common_ancestor(&chain, &recorded, &odd).await.unwrap();
        assert_eq!(event.ancestor, Some(Cursor::new(10, h(b'a', 10))));
        assert_eq!(event.depth, 0);
    }

    #[tokio::test]
    async fn exceeding_max_depth_is_fatal() {
        let det = ReorgDetector::new(3, 0);
        let chain = chain(5); // 6..=10 replaced: depth 5
        let recorded = Recorded::branch_a(0, 10);

        let err = det
            .find_common_ancestor(&chain, &recorded, &mismatched(&chain, 11))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexerError::ReorgTooDeep {
                detected_at: 11,
                max_depth: 3
            }
        ));
    }

    #[tokio::test]
    async fn depth_equal_to_limit_is_allowed() {
        let det = ReorgDetector::new(3, 0);
        let chain = chain(7); // 8, 9, 10 replaced
        let recorded = Recorded::branch_a(0, 10);

        let event = det
            .find_common_ancestor(&chain, &recorded, &mismatched(&chain, 11))
            .await
            .unwrap();
        assert_eq!(event.depth, 3);
        assert_eq!(event.ancestor.unwrap().block_number, 7);
    }

    #[tokio::test]
    async fn missing_recorded_hash_is_fatal() {
        let det = ReorgDetector::new(10, 0);
        let chain = chain(5);
        let recorded = Recorded::branch_a(8, 10); // 7 and below unknown

        let err = det
            .find_common_ancestor(&chain, &recorded, &mismatched(&chain, 11))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::ReorgTooDeep { .. }));
    }

    #[tokio::test]
    async fn reorg_through_start_block_clears_cursor() {
        let det = ReorgDetector::new(10, 20);
        let chain = chain(15); // every indexed block (20..=22) replaced
        let recorded = Recorded::branch_a(20, 22);

        let event = det
            .find_common_ancestor(&chain, &recorded, &mismatched(&chain, 23))
            .await
            .unwrap();
        assert_eq!(event.ancestor, None);
        assert_eq!(event.depth, 3);
    }

    #[tokio::test]
    async fn recorded_chain_prefers_window() {
        struct NoStore;

        #[async_trait]
        impl MailStore for NoStore {
            async fn commit(
                &self,
                _: u64,
                _: &BlockHash,
                _: &[crate::types::MailEnvelope],
            ) -> Result<(), IndexerError> {
                Ok(())
            }
            async fn rollback_after(&self, _: u64) -> Result<(), IndexerError> {
                Ok(())
            }
            async fn rollback_all(&self) -> Result<(), IndexerError> {
                Ok(())
            }
            async fn block_hash(&self, n: u64) -> Result<Option<BlockHash>, IndexerError> {
                Ok(Some(h(b's', n)))
            }
        }

        let mut tracker = BlockTracker::new(4);
        tracker.seed(&Cursor::new(10, h(b'a', 10)));
        let recorded = RecordedChain {
            tracker: &tracker,
            store: &NoStore,
        };

        assert_eq!(recorded.recorded_hash(10).await.unwrap(), Some(h(b'a', 10)));
        assert_eq!(recorded.recorded_hash(9).await.unwrap(), Some(h(b's', 9)));
    }
}
