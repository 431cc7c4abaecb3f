//! Per-batch, per-submitter storage of ciphertext pairs.
//!
//! Each batch keeps an append-only list of submitters in first-submission
//! order; aggregation walks that list instead of the identity space.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::{
    backend::Ciphertext,
    errors::{NegotiationError, NegotiationResult},
    types::{BatchId, Identity},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationEntry {
    pub target: Ciphertext,
    pub floor: Ciphertext,
}

/// Read-only view of a batch for query surfaces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub id: BatchId,
    pub closed: bool,
    pub submitters: usize,
}

#[derive(Clone, Debug, Default)]
struct BatchState {
    closed: bool,
    submitters: Vec<Identity>,
    entries: HashMap<Identity, NegotiationEntry>,
}

pub struct NegotiationLedger {
    current_batch_id: BatchId,
    batches: BTreeMap<BatchId, BatchState>,
}

impl Default for NegotiationLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl NegotiationLedger {
    /// Starts with batch 1 open.
    pub fn new() -> Self {
        let mut batches = BTreeMap::new();
        batches.insert(1, BatchState::default());
        Self {
            current_batch_id: 1,
            batches,
        }
    }

    pub fn current_batch_id(&self) -> BatchId {
        self.current_batch_id
    }

    pub fn open_batch(&mut self) -> BatchId {
        self.current_batch_id += 1;
        self.batches
            .insert(self.current_batch_id, BatchState::default());
        self.current_batch_id
    }

    /// Returns `true` when the batch was open before the call.
    pub fn close_batch(&mut self, batch_id: BatchId) -> NegotiationResult<bool> {
        let batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or(NegotiationError::InvalidBatchId { batch_id })?;
        let newly_closed = !batch.closed;
        batch.closed = true;
        Ok(newly_closed)
    }

    /// `None` for ids that were never opened.
    pub fn is_closed(&self, batch_id: BatchId) -> Option<bool> {
        self.batches.get(&batch_id).map(|batch| batch.closed)
    }

    pub fn summary(&self, batch_id: BatchId) -> Option<BatchSummary> {
        self.batches.get(&batch_id).map(|batch| BatchSummary {
            id: batch_id,
            closed: batch.closed,
            submitters: batch.submitters.len(),
        })
    }

    pub fn ensure_open(&self, batch_id: BatchId) -> NegotiationResult<()> {
        match self.is_closed(batch_id) {
            Some(false) => Ok(()),
            _ => Err(NegotiationError::BatchClosedOrInvalid { batch_id }),
        }
    }

    pub fn ensure_closed(&self, batch_id: BatchId) -> NegotiationResult<()> {
        match self.is_closed(batch_id) {
            Some(true) => Ok(()),
            Some(false) => Err(NegotiationError::BatchClosedOrInvalid { batch_id }),
            None => Err(NegotiationError::InvalidBatchId { batch_id }),
        }
    }

    /// Last write wins. Returns `true` on the submitter's first entry in the batch.
    pub fn store(
        &mut self,
        batch_id: BatchId,
        submitter: &Identity,
        entry: NegotiationEntry,
    ) -> NegotiationResult<bool> {
        let batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or(NegotiationError::InvalidBatchId { batch_id })?;
        let first = batch.entries.insert(submitter.clone(), entry).is_none();
        if first {
            batch.submitters.push(submitter.clone());
        }
        Ok(first)
    }

    pub fn entry(&self, batch_id: BatchId, submitter: &Identity) -> Option<&NegotiationEntry> {
        self.batches
            .get(&batch_id)
            .and_then(|batch| batch.entries.get(submitter))
    }

    pub fn submitters(&self, batch_id: BatchId) -> &[Identity] {
        self.batches
            .get(&batch_id)
            .map(|batch| batch.submitters.as_slice())
            .unwrap_or(&[])
    }

    /// Entries in first-submission order.
    pub fn entries_in_order(
        &self,
        batch_id: BatchId,
    ) -> impl Iterator<Item = (&Identity, &NegotiationEntry)> {
        let batch = self.batches.get(&batch_id);
        batch
            .into_iter()
            .flat_map(|batch| {
                batch
                    .submitters
                    .iter()
                    .filter_map(move |who| batch.entries.get(who).map(|entry| (who, entry)))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: u8) -> NegotiationEntry {
        NegotiationEntry {
            target: Ciphertext::from_bytes(vec![tag]),
            floor: Ciphertext::from_bytes(vec![tag, tag]),
        }
    }

    #[test]
    fn batch_ids_increase_and_zero_is_invalid() {
        let mut ledger = NegotiationLedger::new();
        assert_eq!(ledger.current_batch_id(), 1);
        assert_eq!(ledger.open_batch(), 2);
        assert_eq!(ledger.open_batch(), 3);
        assert_eq!(ledger.is_closed(0), None);
        assert_eq!(
            ledger.close_batch(0).unwrap_err(),
            NegotiationError::InvalidBatchId { batch_id: 0 }
        );
        assert_eq!(
            ledger.close_batch(4).unwrap_err(),
            NegotiationError::InvalidBatchId { batch_id: 4 }
        );
    }

    #[test]
    fn closing_is_one_way_and_idempotent() {
        let mut ledger = NegotiationLedger::new();
        assert!(ledger.close_batch(1).unwrap());
        assert!(!ledger.close_batch(1).unwrap());
        assert_eq!(ledger.is_closed(1), Some(true));
        assert!(ledger.ensure_closed(1).is_ok());
        assert!(ledger.ensure_open(1).is_err());
    }

    #[test]
    fn resubmission_overwrites_but_keeps_first_position() {
        let mut ledger = NegotiationLedger::new();
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        assert!(ledger.store(1, &alice, entry(1)).unwrap());
        assert!(ledger.store(1, &bob, entry(2)).unwrap());
        assert!(!ledger.store(1, &alice, entry(3)).unwrap());

        assert_eq!(ledger.submitters(1), &[alice.clone(), bob.clone()]);
        assert_eq!(ledger.entry(1, &alice), Some(&entry(3)));
        let order: Vec<_> = ledger.entries_in_order(1).map(|(who, _)| who.clone()).collect();
        assert_eq!(order, vec![alice, bob]);
    }
}
