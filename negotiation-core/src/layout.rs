//! Positional layout shared by the decryption request and its callback.
//!
//! Slot 0 carries the target sum and slot 1 the floor sum. The request
//! ciphertext array, the commitment, and the cleartext decoding all go
//! through this module so the two sides cannot drift apart.

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{aggregate::EncryptedAggregate, backend::Ciphertext, types::Commitment};

pub const TARGET_SLOT: usize = 0;
pub const FLOOR_SLOT: usize = 1;
pub const SLOT_COUNT: usize = 2;
/// Each cleartext is a 32-byte big-endian word.
pub const WORD_LEN: usize = 32;

const COMMITMENT_DOMAIN: &[u8] = b"negotiation/decryption-commitment/v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("cleartext payload is {actual} bytes, expected {expected}")]
    Length { expected: usize, actual: usize },
    #[error("cleartext word {slot} does not fit in u32")]
    WordOverflow { slot: usize },
}

/// Decrypted aggregate of one batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearAggregate {
    pub target: u32,
    pub floor: u32,
}

/// Ciphertexts in the order they are sent to the oracle.
pub fn request_slots(aggregate: &EncryptedAggregate) -> [&Ciphertext; SLOT_COUNT] {
    let mut slots = [&aggregate.target; SLOT_COUNT];
    slots[TARGET_SLOT] = &aggregate.target;
    slots[FLOOR_SLOT] = &aggregate.floor;
    slots
}

pub fn commitment(aggregate: &EncryptedAggregate, system_identity: &str) -> Commitment {
    let mut hasher = Hasher::new();
    hasher.update(COMMITMENT_DOMAIN);
    for slot in request_slots(aggregate) {
        let bytes = slot.as_bytes();
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    hasher.update(&(system_identity.len() as u64).to_le_bytes());
    hasher.update(system_identity.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(hasher.finalize().as_bytes());
    Commitment(out)
}

pub fn encode_words(values: &[u32]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * WORD_LEN];
    for (index, value) in values.iter().enumerate() {
        let end = (index + 1) * WORD_LEN;
        out[end - 4..end].copy_from_slice(&value.to_be_bytes());
    }
    out
}

pub fn decode_words(bytes: &[u8], count: usize) -> Result<Vec<u32>, LayoutError> {
    let expected = count * WORD_LEN;
    if bytes.len() != expected {
        return Err(LayoutError::Length {
            expected,
            actual: bytes.len(),
        });
    }
    bytes
        .chunks_exact(WORD_LEN)
        .enumerate()
        .map(|(slot, word)| {
            if word[..WORD_LEN - 4].iter().any(|byte| *byte != 0) {
                return Err(LayoutError::WordOverflow { slot });
            }
            let mut tail = [0u8; 4];
            tail.copy_from_slice(&word[WORD_LEN - 4..]);
            Ok(u32::from_be_bytes(tail))
        })
        .collect()
}

pub fn encode_aggregate(clear: &ClearAggregate) -> Vec<u8> {
    let mut values = [0u32; SLOT_COUNT];
    values[TARGET_SLOT] = clear.target;
    values[FLOOR_SLOT] = clear.floor;
    encode_words(&values)
}

pub fn decode_aggregate(bytes: &[u8]) -> Result<ClearAggregate, LayoutError> {
    let values = decode_words(bytes, SLOT_COUNT)?;
    Ok(ClearAggregate {
        target: values[TARGET_SLOT],
        floor: values[FLOOR_SLOT],
    })
}
