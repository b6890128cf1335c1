//! Shared types for the indexing pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::signature::{PublicKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};

// ─── BlockHash ────────────────────────────────────────────────────────────────

/// A 32-byte block hash. Displayed and serialized as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex form with `0x` prefix.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

impl FromStr for BlockHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// Header fields of a block: enough to track the parent-hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
}

impl BlockHeader {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockHeader) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

/// A block as returned by the chain-access capability.
///
/// Blocks are transient: the indexer drops them once their envelopes are
/// committed and the cursor has moved past them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    /// Opaque payload carrying zero or more length-prefixed envelopes.
    pub payload: Vec<u8>,
}

impl Block {
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            number: self.number,
            hash: self.hash,
            parent_hash: self.parent_hash,
        }
    }
}

// ─── MailEnvelope ─────────────────────────────────────────────────────────────

/// A signed mail message extracted from a block payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailEnvelope {
    /// Ed25519 public key of the sender.
    pub sender: [u8; PUBLIC_KEY_LENGTH],
    /// Recipient identifier.
    pub recipient: String,
    /// Message bytes covered by the signature.
    pub message: Vec<u8>,
    /// Ed25519 signature over `message`.
    pub signature: [u8; SIGNATURE_LENGTH],
    /// Block the envelope was extracted from.
    pub block_number: u64,
    /// Index of the envelope's record within the block payload.
    pub position: u32,
}

impl MailEnvelope {
    pub fn sender_key(&self) -> PublicKey {
        PublicKey::from(self.sender)
    }

    /// Returns `true` if `signature` verifies against `sender` and `message`.
    pub fn is_authentic(&self) -> bool {
        self.sender_key().verify(&self.message, &self.signature)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
