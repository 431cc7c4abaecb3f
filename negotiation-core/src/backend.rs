//! Ciphertext handles and the homomorphic backend seam.
//!
//! The core never looks inside a [`Ciphertext`]; it only asks the backend to
//! add two handles, to tell whether a handle is initialized, and to mint a
//! canonical encryption of zero. [`MaskedAdditiveBackend`] is a keyed toy
//! scheme that makes the protocol testable end to end. It is deterministic
//! and leaks the number of folded inputs, so it must not protect real data.

use blake3::Hasher;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Opaque, serialized ciphertext handle. The empty handle is uninitialized.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Ciphertext(Vec<u8>);

impl Ciphertext {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn uninitialized() -> Self {
        Self(Vec::new())
    }

    /// Stable byte serialization used for commitments.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ciphertext(0x{})", self.to_hex())
    }
}

impl Serialize for Ciphertext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Ciphertext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text.trim_start_matches("0x"))
            .map(Self)
            .map_err(de::Error::custom)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("handle of {len} bytes is not a ciphertext of this backend")]
    ForeignHandle { len: usize },
    #[error("ciphertext was produced under a different key")]
    KeyMismatch,
}

/// Additively homomorphic ciphertext algebra supplied by the deployment.
pub trait HomomorphicBackend: Send + Sync {
    fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, BackendError>;
    fn is_initialized(&self, ciphertext: &Ciphertext) -> bool;
    /// Canonical encryption of zero, substituted for uninitialized submissions.
    fn encrypted_zero(&self) -> Ciphertext;
}

const KEY_ID_LEN: usize = 8;
const HANDLE_LEN: usize = KEY_ID_LEN + 4 + 4;

/// Keyed additive masking: a handle is `key_id || value + w*mask || w`,
/// where `w` counts how many fresh encryptions were folded into it.
///
/// Plaintexts live in `u32` and all arithmetic wraps: a sum above
/// `u32::MAX` decrypts to the sum modulo 2^32, with no error.
#[derive(Clone)]
pub struct MaskedAdditiveBackend {
    key_id: [u8; KEY_ID_LEN],
    mask: u32,
}

impl MaskedAdditiveBackend {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let mut hasher = Hasher::new_keyed(&seed);
        hasher.update(b"negotiation/masked-additive/key-id");
        let mut key_id = [0u8; KEY_ID_LEN];
        key_id.copy_from_slice(&hasher.finalize().as_bytes()[..KEY_ID_LEN]);

        let mut hasher = Hasher::new_keyed(&seed);
        hasher.update(b"negotiation/masked-additive/mask");
        let mut mask = [0u8; 4];
        mask.copy_from_slice(&hasher.finalize().as_bytes()[..4]);
        Self {
            key_id,
            mask: u32::from_le_bytes(mask),
        }
    }

    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::from_seed(blake3::derive_key(
            "negotiation-core masked additive backend v1",
            passphrase.as_bytes(),
        ))
    }

    pub fn encrypt(&self, value: u32) -> Ciphertext {
        self.encode(value.wrapping_add(self.mask), 1)
    }

    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<u32, BackendError> {
        let (masked, weight) = self.decode(ciphertext)?;
        Ok(masked.wrapping_sub(self.mask.wrapping_mul(weight)))
    }

    fn encode(&self, masked: u32, weight: u32) -> Ciphertext {
        let mut bytes = Vec::with_capacity(HANDLE_LEN);
        bytes.extend_from_slice(&self.key_id);
        bytes.extend_from_slice(&masked.to_le_bytes());
        bytes.extend_from_slice(&weight.to_le_bytes());
        Ciphertext(bytes)
    }

    fn decode(&self, ciphertext: &Ciphertext) -> Result<(u32, u32), BackendError> {
        let bytes = ciphertext.as_bytes();
        if bytes.len() != HANDLE_LEN {
            return Err(BackendError::ForeignHandle { len: bytes.len() });
        }
        if bytes[..KEY_ID_LEN] != self.key_id {
            return Err(BackendError::KeyMismatch);
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[KEY_ID_LEN..KEY_ID_LEN + 4]);
        let masked = u32::from_le_bytes(word);
        word.copy_from_slice(&bytes[KEY_ID_LEN + 4..]);
        Ok((masked, u32::from_le_bytes(word)))
    }
}

impl fmt::Debug for MaskedAdditiveBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskedAdditiveBackend")
            .field("key_id", &hex::encode(self.key_id))
            .finish_non_exhaustive()
    }
}

impl HomomorphicBackend for MaskedAdditiveBackend {
    fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, BackendError> {
        let (masked_a, weight_a) = self.decode(a)?;
        let (masked_b, weight_b) = self.decode(b)?;
        Ok(self.encode(
            masked_a.wrapping_add(masked_b),
            weight_a.wrapping_add(weight_b),
        ))
    }

    /// Only handles minted under this backend's key count as initialized.
    fn is_initialized(&self, ciphertext: &Ciphertext) -> bool {
        let bytes = ciphertext.as_bytes();
        bytes.len() == HANDLE_LEN && bytes[..KEY_ID_LEN] == self.key_id
    }

    fn encrypted_zero(&self) -> Ciphertext {
        self.encrypt(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MaskedAdditiveBackend {
        MaskedAdditiveBackend::from_passphrase("unit-test")
    }

    #[test]
    fn addition_is_homomorphic() {
        let backend = backend();
        let sum = backend
            .add(&backend.encrypt(100), &backend.encrypt(200))
            .unwrap();
        assert_eq!(backend.decrypt(&sum).unwrap(), 300);
        let sum = backend.add(&sum, &backend.encrypted_zero()).unwrap();
        assert_eq!(backend.decrypt(&sum).unwrap(), 300);
    }

    #[test]
    fn empty_handle_is_uninitialized() {
        let backend = backend();
        assert!(!backend.is_initialized(&Ciphertext::uninitialized()));
        assert!(backend.is_initialized(&backend.encrypt(7)));
    }

    #[test]
    fn rejects_handles_from_other_keys() {
        let ours = backend();
        let theirs = MaskedAdditiveBackend::from_passphrase("someone-else");
        let err = ours
            .add(&ours.encrypt(1), &theirs.encrypt(1))
            .unwrap_err();
        assert_eq!(err, BackendError::KeyMismatch);
        let err = ours.decrypt(&Ciphertext::from_bytes(vec![1, 2, 3])).unwrap_err();
        assert_eq!(err, BackendError::ForeignHandle { len: 3 });
    }

    #[test]
    fn foreign_key_handles_are_not_initialized() {
        let ours = backend();
        let theirs = MaskedAdditiveBackend::from_passphrase("someone-else");
        assert!(!ours.is_initialized(&theirs.encrypt(1)));
        assert!(ours.is_initialized(&ours.encrypted_zero()));
    }

    #[test]
    fn sums_wrap_modulo_u32() {
        let backend = backend();
        let sum = backend
            .add(&backend.encrypt(u32::MAX), &backend.encrypt(2))
            .unwrap();
        assert_eq!(backend.decrypt(&sum).unwrap(), 1);
    }

    #[test]
    fn ciphertext_round_trips_through_hex_json() {
        let ct = backend().encrypt(42);
        let json = serde_json::to_string(&ct).unwrap();
        let back: Ciphertext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ct);
    }
}
