//! Ed25519 signing and verification over fixed-size keys.
//!
//! Keys are carried as raw bytes so that malformed lengths can be rejected
//! at use time: [`PrivateKey::sign`] fails with [`CryptoError::InvalidKey`],
//! while [`PublicKey::verify`] simply returns `false`.
//!
//! Signing is deterministic (RFC 8032): the same private key and message
//! always produce the same 64-byte signature.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

pub const PUBLIC_KEY_LENGTH: usize = 32;
/// Seed followed by the derived public key.
pub const PRIVATE_KEY_LENGTH: usize = 64;
pub const SIGNATURE_LENGTH: usize = 64;
pub const SEED_LENGTH: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid private key: expected {expected} bytes, got {actual}")]
    InvalidKey { expected: usize, actual: usize },

    #[error("invalid private key: public half does not match seed")]
    KeyMismatch,
}

/// Ed25519 signature (64 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LENGTH]);

impl Signature {
    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; SIGNATURE_LENGTH] {
        self.0
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

/// Ed25519 public key. Valid keys are exactly 32 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns `true` iff `signature` was produced over exactly `message` by
    /// the private key matching this public key.
    ///
    /// Malformed key or signature lengths and points that do not decode
    /// all yield `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(key_bytes) = <&[u8; PUBLIC_KEY_LENGTH]>::try_from(self.0.as_slice()) else {
            return false;
        };
        let Ok(sig_bytes) = <&[u8; SIGNATURE_LENGTH]>::try_from(signature) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(key_bytes) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(sig_bytes);
        key.verify(message, &sig).is_ok()
    }
}

impl From<[u8; PUBLIC_KEY_LENGTH]> for PublicKey {
    fn from(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0))
    }
}

/// Ed25519 private key in the 64-byte `seed || public key` layout.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Sign `message`.
    ///
    /// Fails if the key is not 64 bytes or its public half does not match
    /// the key derived from its seed.
    pub fn sign(&self, message: &[u8]) -> Result<Signature, CryptoError> {
        let bytes = <&[u8; PRIVATE_KEY_LENGTH]>::try_from(self.0.as_slice()).map_err(|_| {
            CryptoError::InvalidKey {
                expected: PRIVATE_KEY_LENGTH,
                actual: self.0.len(),
            }
        })?;
        let signing_key =
            SigningKey::from_keypair_bytes(bytes).map_err(|_| CryptoError::KeyMismatch)?;
        Ok(Signature(signing_key.sign(message).to_bytes()))
    }
}

// Never print secret material.
impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({} bytes)", self.0.len())
    }
}

/// A private key together with its public key.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Derive a keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; SEED_LENGTH]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self {
            private_key: PrivateKey(signing_key.to_keypair_bytes().to_vec()),
            public_key: PublicKey(signing_key.verifying_key().to_bytes().to_vec()),
        }
    }
}

/// Sign `message` with `private_key`.
pub fn sign(private_key: &PrivateKey, message: &[u8]) -> Result<Signature, CryptoError> {
    private_key.sign(message)
}

/// Verify `signature` over `message` against `public_key`.
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &[u8]) -> bool {
    public_key.verify(message, signature)
}
