//! Decryption oracle seam and the request/response correlation types.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;

use crate::{
    backend::{Ciphertext, MaskedAdditiveBackend},
    layout,
    types::{BatchId, Commitment, RequestId},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("decryption oracle unavailable: {0}")]
    Unavailable(String),
    #[error("oracle has no pending request {0}")]
    NotPending(RequestId),
    #[error("oracle issued {0} twice")]
    ReusedRequestId(RequestId),
    #[error("oracle cannot decrypt ciphertext: {0}")]
    Undecryptable(String),
}

/// External asynchronous decryption capability. `request_decryption` must
/// not block on the result; the result arrives later through the engine's
/// callback entry point.
pub trait DecryptionOracle: Send + Sync {
    fn request_decryption(&self, ciphertexts: &[Ciphertext]) -> Result<RequestId, OracleError>;
    fn verify_proof(&self, request_id: RequestId, cleartexts: &[u8], proof: &[u8]) -> bool;
}

impl<T: DecryptionOracle + ?Sized> DecryptionOracle for Arc<T> {
    fn request_decryption(&self, ciphertexts: &[Ciphertext]) -> Result<RequestId, OracleError> {
        (**self).request_decryption(ciphertexts)
    }

    fn verify_proof(&self, request_id: RequestId, cleartexts: &[u8], proof: &[u8]) -> bool {
        (**self).verify_proof(request_id, cleartexts, proof)
    }
}

/// Created once per request; `processed` flips to `true` at most once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionContext {
    pub batch_id: BatchId,
    pub commitment: Commitment,
    pub processed: bool,
}

/// Payload the oracle delivers to the callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionResult {
    pub request_id: RequestId,
    #[serde(with = "hex_bytes")]
    pub cleartexts: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
}

#[derive(Default)]
struct OracleState {
    next_id: u64,
    pending: BTreeMap<RequestId, Vec<Ciphertext>>,
    delivered: BTreeMap<RequestId, DecryptionResult>,
}

/// In-process oracle over [`MaskedAdditiveBackend`]. Proofs are blake3 keyed
/// MACs over `request_id || cleartexts`.
pub struct MockDecryptionOracle {
    backend: MaskedAdditiveBackend,
    proof_key: [u8; 32],
    state: Mutex<OracleState>,
}

impl MockDecryptionOracle {
    pub fn new(backend: MaskedAdditiveBackend, proof_key: [u8; 32]) -> Self {
        Self {
            backend,
            proof_key,
            state: Mutex::new(OracleState {
                next_id: 1,
                ..OracleState::default()
            }),
        }
    }

    pub fn starting_at(self, first_request_id: u64) -> Self {
        self.state.lock().next_id = first_request_id;
        self
    }

    pub fn pending(&self) -> Vec<RequestId> {
        self.state.lock().pending.keys().copied().collect()
    }

    /// Decrypts a pending request and produces an authentic result.
    pub fn fulfill(&self, request_id: RequestId) -> Result<DecryptionResult, OracleError> {
        let mut state = self.state.lock();
        let ciphertexts = state
            .pending
            .get(&request_id)
            .ok_or(OracleError::NotPending(request_id))?;
        let values = ciphertexts
            .iter()
            .map(|ct| self.backend.decrypt(ct))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| OracleError::Undecryptable(err.to_string()))?;
        let cleartexts = layout::encode_words(&values);
        let proof = self.mac(request_id, &cleartexts).to_vec();
        let result = DecryptionResult {
            request_id,
            cleartexts,
            proof,
        };
        state.pending.remove(&request_id);
        state.delivered.insert(request_id, result.clone());
        Ok(result)
    }

    /// Like [`fulfill`](Self::fulfill), but the cleartexts are altered after
    /// the proof was computed.
    pub fn fulfill_forged(&self, request_id: RequestId) -> Result<DecryptionResult, OracleError> {
        let mut result = self.fulfill(request_id)?;
        if let Some(last) = result.cleartexts.last_mut() {
            *last ^= 0x01;
        }
        Ok(result)
    }

    /// Re-sends a result that was already delivered once.
    pub fn redeliver(&self, request_id: RequestId) -> Result<DecryptionResult, OracleError> {
        self.state
            .lock()
            .delivered
            .get(&request_id)
            .cloned()
            .ok_or(OracleError::NotPending(request_id))
    }

    fn mac(&self, request_id: RequestId, cleartexts: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new_keyed(&self.proof_key);
        hasher.update(&request_id.0.to_le_bytes());
        hasher.update(cleartexts);
        *hasher.finalize().as_bytes()
    }
}

impl DecryptionOracle for MockDecryptionOracle {
    fn request_decryption(&self, ciphertexts: &[Ciphertext]) -> Result<RequestId, OracleError> {
        let mut state = self.state.lock();
        let request_id = RequestId(state.next_id);
        if state.pending.contains_key(&request_id) || state.delivered.contains_key(&request_id) {
            return Err(OracleError::ReusedRequestId(request_id));
        }
        state.next_id += 1;
        state.pending.insert(request_id, ciphertexts.to_vec());
        Ok(request_id)
    }

    fn verify_proof(&self, request_id: RequestId, cleartexts: &[u8], proof: &[u8]) -> bool {
        let expected = blake3::Hash::from(self.mac(request_id, cleartexts));
        // blake3::Hash equality is constant time
        <[u8; 32]>::try_from(proof)
            .map(|proof| expected == blake3::Hash::from(proof))
            .unwrap_or(false)
    }
}

mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text.trim_start_matches("0x")).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ClearAggregate;

    fn oracle() -> (MaskedAdditiveBackend, MockDecryptionOracle) {
        let backend = MaskedAdditiveBackend::from_passphrase("oracle");
        let oracle = MockDecryptionOracle::new(backend.clone(), [9u8; 32]).starting_at(7);
        (backend, oracle)
    }

    #[test]
    fn fulfills_with_verifiable_proof() {
        let (backend, oracle) = oracle();
        let id = oracle
            .request_decryption(&[backend.encrypt(100), backend.encrypt(50)])
            .unwrap();
        assert_eq!(id, RequestId(7));
        assert_eq!(oracle.pending(), vec![id]);

        let result = oracle.fulfill(id).unwrap();
        assert!(oracle.verify_proof(id, &result.cleartexts, &result.proof));
        assert!(!oracle.verify_proof(RequestId(8), &result.cleartexts, &result.proof));
        assert_eq!(
            layout::decode_aggregate(&result.cleartexts).unwrap(),
            ClearAggregate {
                target: 100,
                floor: 50
            }
        );
        assert!(oracle.pending().is_empty());
        assert_eq!(oracle.redeliver(id).unwrap(), result);
        assert_eq!(oracle.fulfill(id).unwrap_err(), OracleError::NotPending(id));
    }

    #[test]
    fn forged_results_fail_verification() {
        let (backend, oracle) = oracle();
        let id = oracle
            .request_decryption(&[backend.encrypt(1), backend.encrypt(2)])
            .unwrap();
        let forged = oracle.fulfill_forged(id).unwrap();
        assert!(!oracle.verify_proof(id, &forged.cleartexts, &forged.proof));
        assert!(!oracle.verify_proof(id, &forged.cleartexts, &forged.proof[..16]));
    }
}
