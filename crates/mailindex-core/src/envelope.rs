//! Envelope extraction from block payloads.
//!
//! A payload is a concatenation of length-prefixed records:
//!
//! ```text
//! record  := len:u32be body[len]
//! body    := sender[32] signature[64] rcpt_len:u16be recipient[rcpt_len] message[..]
//! ```
//!
//! A malformed body is skipped and extraction continues with the next record.
//! A length prefix that runs past the end of the payload leaves no way to
//! find the next record, so extraction stops there.

use thiserror::Error;

use crate::signature::{PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use crate::types::{Block, MailEnvelope};

const LENGTH_PREFIX: usize = 4;
const RECIPIENT_PREFIX: usize = 2;
/// Smallest valid body: sender, signature and an empty recipient.
pub const MIN_BODY_LENGTH: usize = PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH + RECIPIENT_PREFIX;

/// A malformed envelope encoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("payload truncated at offset {offset}: need {needed} bytes, {remaining} remain")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("record {position} too short: {len} bytes, need at least {min}", min = MIN_BODY_LENGTH)]
    TooShort { position: u32, len: usize },

    #[error("record {position}: recipient length {declared} exceeds remaining {available} bytes")]
    RecipientOverflow {
        position: u32,
        declared: usize,
        available: usize,
    },

    #[error("record {position}: recipient is not valid UTF-8")]
    InvalidRecipient { position: u32 },

    #[error("recipient is {len} bytes, longer than {max}")]
    RecipientTooLong { len: usize, max: usize },
}

/// Result of extracting one block's payload.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Well-formed envelopes in payload order.
    pub envelopes: Vec<MailEnvelope>,
    /// Problems found along the way; each one cost at most one record.
    pub malformed: Vec<EnvelopeError>,
}

/// Parse every envelope carried in `block`'s payload.
pub fn extract_envelopes(block: &Block) -> Extraction {
    let payload = block.payload.as_slice();
    let mut out = Extraction::default();
    let mut offset = 0usize;
    let mut position = 0u32;

    while offset < payload.len() {
        let remaining = payload.len() - offset;
        if remaining < LENGTH_PREFIX {
            out.malformed.push(EnvelopeError::Truncated {
                offset,
                needed: LENGTH_PREFIX,
                remaining,
            });
            break;
        }
        let len = read_u32(&payload[offset..]) as usize;
        offset += LENGTH_PREFIX;

        let remaining = payload.len() - offset;
        if len > remaining {
            out.malformed.push(EnvelopeError::Truncated {
                offset,
                needed: len,
                remaining,
            });
            break;
        }

        let body = &payload[offset..offset + len];
        offset += len;

        match decode_envelope(body, block.number, position) {
            Ok(envelope) => out.envelopes.push(envelope),
            Err(e) => out.malformed.push(e),
        }
        position += 1;
    }

    for e in &out.malformed {
        tracing::warn!(block = block.number, error = %e, "skipping malformed envelope");
    }

    out
}

/// Decode a single record body.
pub fn decode_envelope(
    body: &[u8],
    block_number: u64,
    position: u32,
) -> Result<MailEnvelope, EnvelopeError> {
    if body.len() < MIN_BODY_LENGTH {
        return Err(EnvelopeError::TooShort {
            position,
            len: body.len(),
        });
    }

    let (sender, rest) = body.split_at(PUBLIC_KEY_LENGTH);
    let (signature, rest) = rest.split_at(SIGNATURE_LENGTH);
    let (rcpt_len, rest) = rest.split_at(RECIPIENT_PREFIX);
    let rcpt_len = u16::from_be_bytes([rcpt_len[0], rcpt_len[1]]) as usize;

    if rcpt_len > rest.len() {
        return Err(EnvelopeError::RecipientOverflow {
            position,
            declared: rcpt_len,
            available: rest.len(),
        });
    }
    let (recipient, message) = rest.split_at(rcpt_len);
    let recipient = std::str::from_utf8(recipient)
        .map_err(|_| EnvelopeError::InvalidRecipient { position })?;

    let mut sender_bytes = [0u8; PUBLIC_KEY_LENGTH];
    sender_bytes.copy_from_slice(sender);
    let mut signature_bytes = [0u8; SIGNATURE_LENGTH];
    signature_bytes.copy_from_slice(signature);

    Ok(MailEnvelope {
        sender: sender_bytes,
        recipient: recipient.to_string(),
        message: message.to_vec(),
        signature: signature_bytes,
        block_number,
        position,
    })
}

/// Encode the body of a record (without its length prefix).
pub fn encode_envelope(envelope: &MailEnvelope) -> Result<Vec<u8>, EnvelopeError> {
    let rcpt = envelope.recipient.as_bytes();
    let rcpt_len = u16::try_from(rcpt.len()).map_err(|_| EnvelopeError::RecipientTooLong {
        len: rcpt.len(),
        max: u16::MAX as usize,
    })?;

    let mut body = Vec::with_capacity(MIN_BODY_LENGTH + rcpt.len() + envelope.message.len());
    body.extend_from_slice(&envelope.sender);
    body.extend_from_slice(&envelope.signature);
    body.extend_from_slice(&rcpt_len.to_be_bytes());
    body.extend_from_slice(rcpt);
    body.extend_from_slice(&envelope.message);
    Ok(body)
}

/// Encode a full payload carrying `envelopes` in order.
pub fn encode_payload(envelopes: &[MailEnvelope]) -> Result<Vec<u8>, EnvelopeError> {
    let mut payload = Vec::new();
    for envelope in envelopes {
        push_record(&mut payload, &encode_envelope(envelope)?);
    }
    Ok(payload)
}

/// Append `body` to `payload` as one length-prefixed record.
pub fn push_record(payload: &mut Vec<u8>, body: &[u8]) {
    payload.extend_from_slice(&(body.len() as u32).to_be_bytes());
    payload.extend_from_slice(body);
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::KeyPair;
    use crate::types::BlockHash;

    fn signed(seed: u8, recipient: &str, message: &[u8]) -> MailEnvelope {
        let kp = KeyPair::from_seed(&[seed; 32]);
        let sig = kp.private_key.sign(message).unwrap();
        MailEnvelope {
            sender: kp.public_key.as_bytes().try_into().unwrap(),
            recipient: recipient.into(),
            message: message.to_vec(),
            signature: sig.to_bytes(),
            block_number: 0,
            position: 0,
        }
    }

    fn block(payload: Vec<u8>) -> Block {
        Block {
            number: 42,
            hash: BlockHash([0x42; 32]),
            parent_hash: BlockHash([0x41; 32]),
            payload,
        }
    }

    #[test]
    fn empty_payload_yields_nothing() {
        let out = extract_envelopes(&block(Vec::new()));
        assert!(out.envelopes.is_empty());
        assert!(out.malformed.is_empty());
    }

    #[test]
    fn extracts_in_payload_order() {
        let a = signed(1, "alice", b"hi alice");
        let b = signed(2, "bob", b"");
        let payload = encode_payload(&[a.clone(), b.clone()]).unwrap();

        let out = extract_envelopes(&block(payload));
        assert!(out.malformed.is_empty());
        assert_eq!(out.envelopes.len(), 2);

        assert_eq!(out.envelopes[0].recipient, "alice");
        assert_eq!(out.envelopes[0].message, b"hi alice");
        assert_eq!(out.envelopes[0].position, 0);
        assert_eq!(out.envelopes[0].block_number, 42);
        assert_eq!(out.envelopes[0].signature, a.signature);

        assert_eq!(out.envelopes[1].recipient, "bob");
        assert!(out.envelopes[1].message.is_empty());
        assert_eq!(out.envelopes[1].position, 1);
        assert_eq!(out.envelopes[1].sender, b.sender);
    }

    #[test]
    fn malformed_record_is_skipped() {
        let mut payload = Vec::new();
        push_record(&mut payload, &encode_envelope(&signed(1, "a", b"one")).unwrap());
        push_record(&mut payload, &[0u8; 10]); // too short
        push_record(&mut payload, &encode_envelope(&signed(3, "c", b"three")).unwrap());

        let out = extract_envelopes(&block(payload));
        assert_eq!(out.envelopes.len(), 2);
        assert_eq!(out.envelopes[0].position, 0);
        // skipped record still occupies position 1
        assert_eq!(out.envelopes[1].position, 2);
        assert_eq!(
            out.malformed,
            vec![EnvelopeError::TooShort {
                position: 1,
                len: 10
            }]
        );
    }

    #[test]
    fn recipient_overflow_and_bad_utf8() {
        let mut overflow = encode_envelope(&signed(1, "ab", b"")).unwrap();
        // claim a 300-byte recipient
        overflow[96] = 0x01;
        overflow[97] = 0x2c;

        let mut bad_utf8 = encode_envelope(&signed(2, "xy", b"m")).unwrap();
        bad_utf8[98] = 0xff;

        let mut payload = Vec::new();
        push_record(&mut payload, &overflow);
        push_record(&mut payload, &bad_utf8);

        let out = extract_envelopes(&block(payload));
        assert!(out.envelopes.is_empty());
        assert_eq!(
            out.malformed,
            vec![
                EnvelopeError::RecipientOverflow {
                    position: 0,
                    declared: 300,
                    available: 2
                },
                EnvelopeError::InvalidRecipient { position: 1 },
            ]
        );
    }

    #[test]
    fn truncated_payload_stops_extraction() {
        let mut payload = encode_payload(&[signed(1, "a", b"ok")]).unwrap();
        // a prefix announcing more bytes than exist
        payload.extend_from_slice(&500u32.to_be_bytes());
        payload.extend_from_slice(&[0u8; 20]);

        let out = extract_envelopes(&block(payload));
        assert_eq!(out.envelopes.len(), 1);
        assert!(matches!(
            out.malformed[0],
            EnvelopeError::Truncated {
                needed: 500,
                remaining: 20,
                ..
            }
        ));
    }

    #[test]
    fn dangling_partial_prefix() {
        let mut payload = encode_payload(&[signed(1, "a", b"ok")]).unwrap();
        payload.extend_from_slice(&[0, 0]);

        let out = extract_envelopes(&block(payload));
        assert_eq!(out.envelopes.len(), 1);
        assert!(matches!(
            out.malformed[0],
            EnvelopeError::Truncated { needed: 4, remaining: 2, .. }
        ));
    }

    #[test]
    fn extracted_envelopes_still_verify() {
        let payload = encode_payload(&[signed(5, "carol", b"signed body")]).unwrap();
        let out = extract_envelopes(&block(payload));
        assert!(out.envelopes[0].is_authentic());
    }

    #[test]
    fn oversized_recipient_cannot_be_encoded() {
        let mut env = signed(1, "", b"");
        env.recipient = "r".repeat(70_000);
        assert!(matches!(
            encode_envelope(&env),
            Err(EnvelopeError::RecipientTooLong { len: 70_000, .. })
        ));
    }
}
