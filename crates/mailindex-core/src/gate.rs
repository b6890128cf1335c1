//! Verification gate — drops envelopes whose signature does not verify.
//!
//! Verification is a pure function of `(sender, message, signature)`, so a
//! block's envelopes are split into contiguous chunks and checked on the
//! blocking pool. Chunks are joined back in order, which keeps the payload
//! order intact for the commit.

use futures::future::join_all;

use crate::error::IndexerError;
use crate::types::MailEnvelope;

/// Outcome of gating one block's envelopes.
#[derive(Debug, Default)]
pub struct GateOutcome {
    /// Authentic envelopes, in extraction order.
    pub accepted: Vec<MailEnvelope>,
    /// Positions of envelopes that failed verification.
    pub rejected: Vec<u32>,
}

/// Applies signature verification to extracted envelopes.
#[derive(Debug, Clone)]
pub struct VerificationGate {
    workers: usize,
}

impl VerificationGate {
    /// `workers` is clamped to at least one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub async fn verify_all(
        &self,
        envelopes: Vec<MailEnvelope>,
    ) -> Result<GateOutcome, IndexerError> {
        let checked = if self.workers == 1 || envelopes.len() < 2 {
            check_chunk(envelopes)
        } else {
            self.check_parallel(envelopes).await?
        };

        let mut outcome = GateOutcome::default();
        for (envelope, ok) in checked {
            if ok {
                outcome.accepted.push(envelope);
            } else {
                tracing::warn!(
                    block = envelope.block_number,
                    position = envelope.position,
                    recipient = %envelope.recipient,
                    "rejected envelope with invalid signature"
                );
                outcome.rejected.push(envelope.position);
            }
        }
        Ok(outcome)
    }

    async fn check_parallel(
        &self,
        envelopes: Vec<MailEnvelope>,
    ) -> Result<Vec<(MailEnvelope, bool)>, IndexerError> {
        let chunk_size = envelopes.len().div_ceil(self.workers);
        let mut chunks = Vec::with_capacity(self.workers);
        let mut iter = envelopes.into_iter().peekable();
        while iter.peek().is_some() {
            chunks.push(iter.by_ref().take(chunk_size).collect::<Vec<_>>());
        }

        let handles = chunks
            .into_iter()
            .map(|chunk| tokio::task::spawn_blocking(move || check_chunk(chunk)));

        let mut out = Vec::new();
        for joined in join_all(handles).await {
            let chunk = joined
                .map_err(|e| IndexerError::Other(format!("verification worker failed: {e}")))?;
            out.extend(chunk);
        }
        Ok(out)
    }
}

impl Default for VerificationGate {
    fn default() -> Self {
        Self::new(1)
    }
}

fn check_chunk(chunk: Vec<MailEnvelope>) -> Vec<(MailEnvelope, bool)> {
    chunk
        .into_iter()
        .map(|envelope| {
            let ok = envelope.is_authentic();
            (envelope, ok)
        })
        .collect()
}
