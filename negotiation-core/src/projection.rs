use std::collections::{BTreeMap, BTreeSet};

use crate::{
    events::{EventRecord, NegotiationEvent},
    layout::ClearAggregate,
    ledger::NegotiationEntry,
    oracle::DecryptionContext,
    types::{BatchId, Identity, RequestId},
};

/// Query surface rebuilt purely from the event log.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateProjection {
    pub owner: Option<Identity>,
    pub providers: BTreeSet<Identity>,
    pub paused: bool,
    pub cooldown_seconds: u64,
    pub current_batch_id: BatchId,
    pub closed_batches: BTreeSet<BatchId>,
    pub entries: BTreeMap<(BatchId, Identity), NegotiationEntry>,
    pub contexts: BTreeMap<RequestId, DecryptionContext>,
    pub results: BTreeMap<RequestId, ClearAggregate>,
}

impl StateProjection {
    pub fn replay<'a>(records: impl IntoIterator<Item = &'a EventRecord>) -> Self {
        let mut state = Self::default();
        for record in records {
            state.apply(&record.event);
        }
        state
    }

    pub fn apply(&mut self, event: &NegotiationEvent) {
        match event {
            NegotiationEvent::OwnershipTransferred { new_owner, .. } => {
                self.owner = Some(new_owner.clone());
            }
            NegotiationEvent::ProviderAdded { provider } => {
                self.providers.insert(provider.clone());
            }
            NegotiationEvent::ProviderRemoved { provider } => {
                self.providers.remove(provider);
            }
            NegotiationEvent::Paused { .. } => self.paused = true,
            NegotiationEvent::Unpaused { .. } => self.paused = false,
            NegotiationEvent::CooldownUpdated {
                cooldown_seconds, ..
            } => self.cooldown_seconds = *cooldown_seconds,
            NegotiationEvent::BatchOpened { batch_id } => {
                self.current_batch_id = self.current_batch_id.max(*batch_id);
            }
            NegotiationEvent::BatchClosed { batch_id } => {
                self.closed_batches.insert(*batch_id);
            }
            NegotiationEvent::NegotiationSubmitted {
                batch_id,
                submitter,
                target,
                floor,
            } => {
                self.entries.insert(
                    (*batch_id, submitter.clone()),
                    NegotiationEntry {
                        target: target.clone(),
                        floor: floor.clone(),
                    },
                );
            }
            NegotiationEvent::DecryptionRequested {
                request_id,
                batch_id,
                commitment,
            } => {
                self.contexts.insert(
                    *request_id,
                    DecryptionContext {
                        batch_id: *batch_id,
                        commitment: *commitment,
                        processed: false,
                    },
                );
            }
            NegotiationEvent::DecryptionCompleted {
                request_id,
                target_sum,
                floor_sum,
                ..
            } => {
                if let Some(context) = self.contexts.get_mut(request_id) {
                    context.processed = true;
                }
                self.results.insert(
                    *request_id,
                    ClearAggregate {
                        target: *target_sum,
                        floor: *floor_sum,
                    },
                );
            }
        }
    }

    pub fn is_closed(&self, batch_id: BatchId) -> Option<bool> {
        if batch_id == 0 || batch_id > self.current_batch_id {
            return None;
        }
        Some(self.closed_batches.contains(&batch_id))
    }
}
