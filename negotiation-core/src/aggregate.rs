use serde::{Deserialize, Serialize};

use crate::{
    backend::{Ciphertext, HomomorphicBackend},
    errors::{NegotiationError, NegotiationResult},
    ledger::NegotiationLedger,
    types::BatchId,
};

/// Homomorphic sum of every initialized entry of one batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedAggregate {
    pub target: Ciphertext,
    pub floor: Ciphertext,
    pub contributors: usize,
}

/// Folds the batch in first-submission order. The first initialized entry
/// seeds the accumulator; no identity element is assumed. Same ledger state
/// and backend give byte-identical output.
pub fn aggregate_batch<B>(
    backend: &B,
    ledger: &NegotiationLedger,
    batch_id: BatchId,
) -> NegotiationResult<EncryptedAggregate>
where
    B: HomomorphicBackend + ?Sized,
{
    let mut accumulator: Option<EncryptedAggregate> = None;
    for (_, entry) in ledger.entries_in_order(batch_id) {
        if !backend.is_initialized(&entry.target) || !backend.is_initialized(&entry.floor) {
            continue;
        }
        accumulator = Some(match accumulator {
            None => EncryptedAggregate {
                target: entry.target.clone(),
                floor: entry.floor.clone(),
                contributors: 1,
            },
            Some(acc) => EncryptedAggregate {
                target: backend.add(&acc.target, &entry.target)?,
                floor: backend.add(&acc.floor, &entry.floor)?,
                contributors: acc.contributors + 1,
            },
        });
    }
    accumulator.ok_or(NegotiationError::EmptyAggregate { batch_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::MaskedAdditiveBackend, ledger::NegotiationEntry, types::Identity};

    #[test]
    fn skips_uninitialized_entries_and_rejects_empty_batches() {
        let backend = MaskedAdditiveBackend::from_passphrase("aggregate");
        let mut ledger = NegotiationLedger::new();
        assert_eq!(
            aggregate_batch(&backend, &ledger, 1).unwrap_err(),
            NegotiationError::EmptyAggregate { batch_id: 1 }
        );

        ledger
            .store(
                1,
                &Identity::new("half"),
                NegotiationEntry {
                    target: backend.encrypt(5),
                    floor: Ciphertext::uninitialized(),
                },
            )
            .unwrap();
        assert!(aggregate_batch(&backend, &ledger, 1).is_err());

        ledger
            .store(
                1,
                &Identity::new("full"),
                NegotiationEntry {
                    target: backend.encrypt(10),
                    floor: backend.encrypt(4),
                },
            )
            .unwrap();
        let agg = aggregate_batch(&backend, &ledger, 1).unwrap();
        assert_eq!(agg.contributors, 1);
        assert_eq!(backend.decrypt(&agg.target).unwrap(), 10);
        assert_eq!(backend.decrypt(&agg.floor).unwrap(), 4);
    }
}
