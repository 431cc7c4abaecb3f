use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    backend::{Ciphertext, HomomorphicBackend},
    engine::NegotiationEngine,
    errors::NegotiationResult,
    layout::ClearAggregate,
    oracle::DecryptionOracle,
    types::{BatchId, Identity, RequestId, Timestamp},
};

/// Cloneable handle that serializes every operation through one lock, so
/// concurrent callers observe the same atomic transitions as a single caller.
pub struct SharedEngine<B, O> {
    inner: Arc<Mutex<NegotiationEngine<B, O>>>,
}

impl<B, O> Clone for SharedEngine<B, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: HomomorphicBackend, O: DecryptionOracle> SharedEngine<B, O> {
    pub fn new(engine: NegotiationEngine<B, O>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Runs `f` with exclusive access. Keep the closure short; it holds the lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut NegotiationEngine<B, O>) -> R) -> R {
        f(&mut *self.inner.lock())
    }

    pub fn submit_negotiation(
        &self,
        caller: &Identity,
        batch_id: BatchId,
        target: Ciphertext,
        floor: Ciphertext,
        now: Timestamp,
    ) -> NegotiationResult<()> {
        self.inner
            .lock()
            .submit_negotiation(caller, batch_id, target, floor, now)
    }

    pub fn close_batch(
        &self,
        caller: &Identity,
        batch_id: BatchId,
        now: Timestamp,
    ) -> NegotiationResult<bool> {
        self.inner.lock().close_batch(caller, batch_id, now)
    }

    pub fn open_batch(&self, caller: &Identity, now: Timestamp) -> NegotiationResult<BatchId> {
        self.inner.lock().open_batch(caller, now)
    }

    pub fn request_decryption_for_batch(
        &self,
        caller: &Identity,
        batch_id: BatchId,
        now: Timestamp,
    ) -> NegotiationResult<RequestId> {
        self.inner
            .lock()
            .request_decryption_for_batch(caller, batch_id, now)
    }

    pub fn on_decryption_result(
        &self,
        request_id: RequestId,
        cleartexts: &[u8],
        proof: &[u8],
        now: Timestamp,
    ) -> NegotiationResult<ClearAggregate> {
        self.inner
            .lock()
            .on_decryption_result(request_id, cleartexts, proof, now)
    }
}
