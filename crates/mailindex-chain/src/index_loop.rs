//! The main index loop: a single control loop driving the indexer state machine.
//!
//! ```text
//! Idle → Polling → Fetching → ReorgCheck → Extracting → Verifying → Committing
//!   ↑                  ↑           │                                     │
//!   │                  └──── ReorgRecovery                               │
//!   └───────────────── caught up ─────────────── more behind latest ─────┘
//! ```
//!
//! Each pass indexes at most one block:
//!   - Poll the chain head; nothing to do if the cursor already reached it
//!   - Fetch `cursor + 1` and check its parent hash against the cursor
//!   - On mismatch, walk back to the common ancestor, save it as the cursor,
//!     and roll the store back; the next pass fetches again without polling
//!   - Extract envelopes, drop the ones that fail verification
//!   - Commit the block downstream, then save the new cursor
//!
//! Commits are idempotent per block, so a crash between the commit and the
//! cursor save re-indexes the same block on restart. On resume the store is
//! rolled back to the saved cursor before anything else happens.
//!
//! Chain calls, the commit, the cursor save, and the poll tick all race the
//! shutdown signal. Cancellation moves the loop to `Stopped` and leaves the
//! cursor at the last fully committed block. Running a stopped loop again
//! repeats the resume rollback first.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use mailindex_core::checkpoint::{CheckpointManager, CursorStore};
use mailindex_core::cursor::Cursor;
use mailindex_core::envelope::extract_envelopes;
use mailindex_core::error::IndexerError;
use mailindex_core::gate::VerificationGate;
use mailindex_core::indexer::{IndexStats, IndexerConfig, IndexerState};
use mailindex_core::reorg::{RecordedChain, ReorgDetector};
use mailindex_core::retry::RetryPolicy;
use mailindex_core::store::MailStore;
use mailindex_core::tracker::BlockTracker;
use mailindex_core::types::BlockHeader;

use crate::fetcher::{BlockFetcher, ChainClient};

/// What a single pass of the loop achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Caught up with the chain head; wait for the next tick.
    Idle,
    /// Indexed a block and more remain behind the head.
    CatchingUp,
    /// Rolled the cursor back after a reorg; fetch again right away.
    RolledBack,
}

/// Result of reorg recovery.
enum Recovery {
    RolledBack,
    /// The chain reported a block whose parent mismatches the cursor while
    /// the cursor's own block is still canonical.
    Inconsistent,
}

/// The core index loop implementation.
pub struct IndexLoop<C: ChainClient> {
    config: IndexerConfig,
    fetcher: BlockFetcher<C>,
    tracker: BlockTracker,
    reorg_detector: ReorgDetector,
    checkpoint: CheckpointManager,
    store: Arc<dyn MailStore>,
    gate: VerificationGate,
    cursor: Option<Cursor>,
    state: IndexerState,
    stats: IndexStats,
    resumed: bool,
    /// Chain head seen before a rollback, reused by the following fetch.
    known_head: Option<u64>,
}

impl<C: ChainClient> IndexLoop<C> {
    pub fn new(
        config: IndexerConfig,
        client: C,
        store: Arc<dyn MailStore>,
        cursor_store: Arc<dyn CursorStore>,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        let window =
            usize::try_from(config.max_reorg_depth.saturating_add(1)).unwrap_or(usize::MAX);
        Ok(Self {
            fetcher: BlockFetcher::new(client, RetryPolicy::new(config.retry.clone())),
            tracker: BlockTracker::new(window),
            reorg_detector: ReorgDetector::new(config.max_reorg_depth, config.start_block),
            checkpoint: CheckpointManager::new(cursor_store, config.id.clone()),
            store,
            gate: VerificationGate::new(config.verify_workers),
            cursor: None,
            state: IndexerState::Idle,
            stats: IndexStats::default(),
            resumed: false,
            known_head: None,
            config,
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    /// Last fully indexed block, `None` before the first commit.
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    /// The wrapped chain client.
    pub fn client(&self) -> &C {
        self.fetcher.client()
    }

    /// Load the saved cursor and discard anything the store holds past it.
    ///
    /// Called automatically by [`run`](Self::run) and [`poll_once`](Self::poll_once).
    pub async fn resume(&mut self) -> Result<Option<Cursor>, IndexerError> {
        match self.checkpoint.load().await? {
            Some(cursor) => {
                tracing::info!(
                    id = %self.config.id,
                    block = cursor.block_number,
                    hash = %cursor.block_hash,
                    "Resuming from checkpoint"
                );
                self.store.rollback_after(cursor.block_number).await?;
                self.tracker.seed(&cursor);
                self.cursor = Some(cursor);
            }
            None => {
                tracing::info!(
                    id = %self.config.id,
                    start_block = self.config.start_block,
                    "No checkpoint, starting from start block"
                );
                self.store.rollback_all().await?;
                self.tracker.clear();
                self.cursor = None;
            }
        }
        self.known_head = None;
        self.resumed = true;
        Ok(self.cursor)
    }

    /// Run a single pass without a shutdown signal.
    pub async fn poll_once(&mut self) -> Result<StepOutcome, IndexerError> {
        let (_never, mut shutdown) = watch::channel(false);
        if !self.resumed {
            self.resume().await?;
        }
        let result = self.step(&mut shutdown).await;
        match &result {
            Ok(StepOutcome::Idle) => self.state = IndexerState::Idle,
            Ok(_) => {}
            Err(e) if e.is_retryable() => self.state = IndexerState::Idle,
            Err(_) => {
                self.state = IndexerState::Stopped;
                self.resumed = false;
            }
        }
        result
    }

    /// Run the index loop until `shutdown` is set or a fatal error occurs.
    ///
    /// Returns `Ok(())` on shutdown. Fatal errors (`ReorgTooDeep`, commit
    /// failure, permanent fetch errors, too many consecutive `FetchFailed`)
    /// stop the loop and are returned.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IndexerError> {
        if !self.resumed {
            match guarded(&mut shutdown, self.resume()).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return self.fail(e),
                Err(_) => return self.shut_down(),
            }
        }

        tracing::info!(id = %self.config.id, "Index loop started");
        let mut failures = 0u32;

        loop {
            match self.step(&mut shutdown).await {
                Ok(StepOutcome::CatchingUp) | Ok(StepOutcome::RolledBack) => {
                    failures = 0;
                    continue;
                }
                Ok(StepOutcome::Idle) => failures = 0,
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    if failures > self.config.max_consecutive_fetch_failures {
                        tracing::error!(failures, "Too many consecutive fetch failures");
                        return self.fail(e);
                    }
                    tracing::warn!(failures, error = %e, "Fetch failed, retrying next tick");
                }
                Err(e) if e.is_fatal() => return self.fail(e),
                Err(_) => return self.shut_down(),
            }

            self.state = IndexerState::Idle;
            let tick = tokio::time::sleep(self.config.poll_interval());
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => return self.shut_down(),
                _ = tick => {}
            }
        }
    }

    /// Stop on the shutdown signal. Work interrupted mid-block is discarded
    /// by the resume rollback on the next run.
    fn shut_down(&mut self) -> Result<(), IndexerError> {
        self.state = IndexerState::Stopped;
        self.resumed = false;
        tracing::info!(
            id = %self.config.id,
            cursor = ?self.cursor.map(|c| c.block_number),
            "Index loop stopped"
        );
        Ok(())
    }

    fn fail(&mut self, err: IndexerError) -> Result<(), IndexerError> {
        let state = self.state;
        self.state = IndexerState::Stopped;
        self.resumed = false;
        tracing::error!(id = %self.config.id, %state, error = %err, "Index loop failed");
        Err(err)
    }

    fn next_block(&self) -> u64 {
        self.cursor
            .map(|c| c.next_block())
            .unwrap_or(self.config.start_block)
    }

    async fn step(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StepOutcome, IndexerError> {
        let latest = match self.known_head.take() {
            Some(head) => head,
            None => {
                self.state = IndexerState::Polling;
                guarded(shutdown, self.fetcher.latest_block_number()).await?
            }
        };
        let next = self.next_block();
        if latest < next {
            tracing::trace!(latest, next, "caught up");
            self.state = IndexerState::Idle;
            return Ok(StepOutcome::Idle);
        }

        self.state = IndexerState::Fetching;
        let block = match guarded(shutdown, self.fetcher.block_by_number(next)).await {
            Ok(block) => block,
            Err(IndexerError::BlockNotFound { number }) => {
                tracing::debug!(block = number, latest, "block not available yet");
                self.state = IndexerState::Idle;
                return Ok(StepOutcome::Idle);
            }
            Err(e) => return Err(e),
        };
        let header = block.header();

        if let Some(cursor) = self.cursor {
            self.state = IndexerState::ReorgCheck;
            if !self.reorg_detector.check(&cursor, &header) {
                self.state = IndexerState::ReorgRecovery;
                return match self.recover(&header, shutdown).await? {
                    Recovery::RolledBack => {
                        self.known_head = Some(latest);
                        self.state = IndexerState::Fetching;
                        Ok(StepOutcome::RolledBack)
                    }
                    Recovery::Inconsistent => {
                        self.state = IndexerState::Idle;
                        Ok(StepOutcome::Idle)
                    }
                };
            }
        }

        self.state = IndexerState::Extracting;
        let extraction = extract_envelopes(&block);
        self.stats.envelopes_malformed += extraction.malformed.len() as u64;

        self.state = IndexerState::Verifying;
        let outcome = self.gate.verify_all(extraction.envelopes).await?;
        self.stats.envelopes_rejected += outcome.rejected.len() as u64;

        self.state = IndexerState::Committing;
        guarded(
            shutdown,
            self.store.commit(header.number, &header.hash, &outcome.accepted),
        )
        .await
        .map_err(|e| match e {
            IndexerError::Cancelled | IndexerError::Commit(_) => e,
            other => IndexerError::Commit(other.to_string()),
        })?;

        let cursor = Cursor::from(&header);
        guarded(shutdown, self.checkpoint.save(&cursor)).await?;
        self.cursor = Some(cursor);

        if let Err(header) = self.tracker.push(header) {
            self.tracker.clear();
            self.tracker.push(header).ok();
        }

        self.stats.blocks_indexed += 1;
        self.stats.envelopes_committed += outcome.accepted.len() as u64;
        tracing::debug!(
            block = cursor.block_number,
            hash = %cursor.block_hash,
            envelopes = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            malformed = extraction.malformed.len(),
            "block indexed"
        );

        if cursor.block_number < latest {
            self.state = IndexerState::Polling;
            Ok(StepOutcome::CatchingUp)
        } else {
            self.state = IndexerState::Idle;
            Ok(StepOutcome::Idle)
        }
    }

    /// Roll the cursor and the store back to the common ancestor of the
    /// indexed branch and the canonical chain.
    async fn recover(
        &mut self,
        mismatched: &BlockHeader,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Recovery, IndexerError> {
        let recorded = RecordedChain {
            tracker: &self.tracker,
            store: self.store.as_ref(),
        };
        let event = guarded(
            shutdown,
            self.reorg_detector
                .find_common_ancestor(&self.fetcher, &recorded, mismatched),
        )
        .await?;

        if event.depth == 0 {
            tracing::warn!(
                block = event.detected_at,
                parent = %mismatched.parent_hash,
                "Parent mismatch but cursor block still canonical, retrying next tick"
            );
            return Ok(Recovery::Inconsistent);
        }

        // Cursor first: a crash before the rollback is cleaned up on resume.
        match event.ancestor {
            Some(ancestor) => {
                guarded(shutdown, self.checkpoint.save(&ancestor)).await?;
                self.cursor = Some(ancestor);
                guarded(shutdown, self.store.rollback_after(ancestor.block_number)).await?;
                self.tracker.rewind_to(ancestor.block_number);
                if self.tracker.is_empty() {
                    self.tracker.seed(&ancestor);
                }
            }
            None => {
                guarded(shutdown, self.checkpoint.clear()).await?;
                self.cursor = None;
                guarded(shutdown, self.store.rollback_all()).await?;
                self.tracker.clear();
            }
        }

        self.stats.reorgs += 1;
        tracing::info!(
            detected_at = event.detected_at,
            depth = event.depth,
            ancestor = ?event.ancestor.map(|c| c.block_number),
            "Reorg recovered"
        );
        Ok(Recovery::RolledBack)
    }
}

/// Resolves once `shutdown` reads `true`. Never resolves if the sender is
/// dropped without signalling.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Race `fut` against the shutdown signal.
async fn guarded<T, F>(shutdown: &mut watch::Receiver<bool>, fut: F) -> Result<T, IndexerError>
where
    F: Future<Output = Result<T, IndexerError>>,
{
    tokio::select! {
        biased;
        _ = cancelled(shutdown) => Err(IndexerError::Cancelled),
        res = fut => res,
    }
}
