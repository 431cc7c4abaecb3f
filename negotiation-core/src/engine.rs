//! Batch lifecycle, confidential submissions, and the commitment-bound
//! decryption request/callback state machine.
//!
//! Every public operation is all-or-nothing: preconditions are checked before
//! any state is touched, and events are emitted only after the change has
//! been applied. A decryption request moves `Requested -> Fulfilled` through
//! [`NegotiationEngine::on_decryption_result`]; a rejected callback leaves the
//! context untouched.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use tracing::{debug, error, info, warn};

use crate::{
    access::AccessControl,
    aggregate::{aggregate_batch, EncryptedAggregate},
    backend::{Ciphertext, HomomorphicBackend},
    config::{ConfigError, EngineConfig},
    errors::{NegotiationError, NegotiationResult},
    events::{EventRecord, EventSink, IntegrityAlert, NegotiationEvent},
    layout::{self, ClearAggregate},
    ledger::{BatchSummary, NegotiationEntry, NegotiationLedger},
    oracle::{DecryptionContext, DecryptionOracle, OracleError},
    projection::StateProjection,
    types::{ActionKind, BatchId, Identity, RequestId, Timestamp},
};

pub struct NegotiationEngine<B, O> {
    system_identity: String,
    access: AccessControl,
    ledger: NegotiationLedger,
    contexts: HashMap<RequestId, DecryptionContext>,
    results: HashMap<RequestId, ClearAggregate>,
    backend: B,
    oracle: O,
    sink: Arc<dyn EventSink>,
    sequence: u64,
}

impl<B: HomomorphicBackend, O: DecryptionOracle> NegotiationEngine<B, O> {
    /// Owner is the genesis owner, batch 1 is open. Fails if `config` does
    /// not validate.
    pub fn new(
        config: EngineConfig,
        backend: B,
        oracle: O,
        sink: Arc<dyn EventSink>,
        now: Timestamp,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let EngineConfig {
            system_identity,
            genesis_owner,
            cooldown_seconds,
            initial_providers,
        } = config;
        let mut engine = Self {
            system_identity,
            access: AccessControl::new(genesis_owner.clone(), cooldown_seconds),
            ledger: NegotiationLedger::new(),
            contexts: HashMap::new(),
            results: HashMap::new(),
            backend,
            oracle,
            sink,
            sequence: 0,
        };
        engine.emit(
            now,
            NegotiationEvent::OwnershipTransferred {
                previous: None,
                new_owner: genesis_owner,
            },
        );
        engine.emit(
            now,
            NegotiationEvent::CooldownUpdated {
                previous: 0,
                cooldown_seconds,
            },
        );
        engine.emit(now, NegotiationEvent::BatchOpened { batch_id: 1 });
        for provider in initial_providers {
            if engine.access.add_provider(provider.clone()) {
                engine.emit(now, NegotiationEvent::ProviderAdded { provider });
            }
        }
        info!(
            system_identity = %engine.system_identity,
            owner = %engine.access.owner(),
            cooldown_seconds,
            "negotiation engine started"
        );
        Ok(engine)
    }

    pub fn transfer_ownership(
        &mut self,
        caller: &Identity,
        new_owner: Identity,
        now: Timestamp,
    ) -> NegotiationResult<()> {
        let result = self.access.ensure_owner(caller).map(|()| {
            let previous = self.access.transfer_ownership(new_owner.clone());
            self.emit(
                now,
                NegotiationEvent::OwnershipTransferred {
                    previous: Some(previous),
                    new_owner,
                },
            );
        });
        self.observe("transfer_ownership", caller, result)
    }

    /// Returns `false` when `provider` was already registered.
    pub fn add_provider(
        &mut self,
        caller: &Identity,
        provider: Identity,
        now: Timestamp,
    ) -> NegotiationResult<bool> {
        let result = self.access.ensure_owner(caller).map(|()| {
            let added = self.access.add_provider(provider.clone());
            if added {
                self.emit(now, NegotiationEvent::ProviderAdded { provider });
            }
            added
        });
        self.observe("add_provider", caller, result)
    }

    /// Returns `false` when `provider` was not registered.
    pub fn remove_provider(
        &mut self,
        caller: &Identity,
        provider: &Identity,
        now: Timestamp,
    ) -> NegotiationResult<bool> {
        let result = self.access.ensure_owner(caller).map(|()| {
            let removed = self.access.remove_provider(provider);
            if removed {
                self.emit(
                    now,
                    NegotiationEvent::ProviderRemoved {
                        provider: provider.clone(),
                    },
                );
            }
            removed
        });
        self.observe("remove_provider", caller, result)
    }

    pub fn pause(&mut self, caller: &Identity, now: Timestamp) -> NegotiationResult<()> {
        let result = self
            .access
            .ensure_owner(caller)
            .and_then(|()| self.access.pause())
            .map(|()| self.emit(now, NegotiationEvent::Paused { by: caller.clone() }));
        self.observe("pause", caller, result)
    }

    pub fn unpause(&mut self, caller: &Identity, now: Timestamp) -> NegotiationResult<()> {
        let result = self
            .access
            .ensure_owner(caller)
            .and_then(|()| self.access.unpause())
            .map(|()| self.emit(now, NegotiationEvent::Unpaused { by: caller.clone() }));
        self.observe("unpause", caller, result)
    }

    pub fn set_cooldown_seconds(
        &mut self,
        caller: &Identity,
        cooldown_seconds: u64,
        now: Timestamp,
    ) -> NegotiationResult<()> {
        let result = self.access.ensure_owner(caller).map(|()| {
            let previous = self.access.set_cooldown_seconds(cooldown_seconds);
            self.emit(
                now,
                NegotiationEvent::CooldownUpdated {
                    previous,
                    cooldown_seconds,
                },
            );
        });
        self.observe("set_cooldown_seconds", caller, result)
    }

    pub fn open_batch(&mut self, caller: &Identity, now: Timestamp) -> NegotiationResult<BatchId> {
        let result = self
            .access
            .ensure_owner(caller)
            .and_then(|()| self.access.ensure_not_paused())
            .map(|()| {
                let batch_id = self.ledger.open_batch();
                info!(batch_id, "batch opened");
                self.emit(now, NegotiationEvent::BatchOpened { batch_id });
                batch_id
            });
        self.observe("open_batch", caller, result)
    }

    /// Closing an already-closed batch succeeds and returns `false`.
    pub fn close_batch(
        &mut self,
        caller: &Identity,
        batch_id: BatchId,
        now: Timestamp,
    ) -> NegotiationResult<bool> {
        let result = self
            .access
            .ensure_owner(caller)
            .and_then(|()| self.ledger.close_batch(batch_id))
            .map(|newly_closed| {
                if newly_closed {
                    info!(batch_id, "batch closed");
                    self.emit(now, NegotiationEvent::BatchClosed { batch_id });
                }
                newly_closed
            });
        self.observe("close_batch", caller, result)
    }

    /// Stores (or overwrites) the caller's entry for an open batch.
    /// Uninitialized handles are replaced by the backend's encrypted zero.
    pub fn submit_negotiation(
        &mut self,
        caller: &Identity,
        batch_id: BatchId,
        target: Ciphertext,
        floor: Ciphertext,
        now: Timestamp,
    ) -> NegotiationResult<()> {
        let result = self.try_submit(caller, batch_id, target, floor, now);
        self.observe("submit_negotiation", caller, result)
    }

    fn try_submit(
        &mut self,
        caller: &Identity,
        batch_id: BatchId,
        target: Ciphertext,
        floor: Ciphertext,
        now: Timestamp,
    ) -> NegotiationResult<()> {
        self.access.ensure_provider(caller)?;
        self.access.ensure_not_paused()?;
        self.access
            .ensure_cooldown(caller, ActionKind::Submission, now)?;
        self.ledger.ensure_open(batch_id)?;

        let target = self.initialized_or_zero(target);
        let floor = self.initialized_or_zero(floor);
        let first = self.ledger.store(
            batch_id,
            caller,
            NegotiationEntry {
                target: target.clone(),
                floor: floor.clone(),
            },
        )?;
        self.access
            .record_action(caller, ActionKind::Submission, now);
        info!(batch_id, submitter = %caller, first, "negotiation stored");
        self.emit(
            now,
            NegotiationEvent::NegotiationSubmitted {
                batch_id,
                submitter: caller.clone(),
                target,
                floor,
            },
        );
        Ok(())
    }

    fn initialized_or_zero(&self, ciphertext: Ciphertext) -> Ciphertext {
        if self.backend.is_initialized(&ciphertext) {
            ciphertext
        } else {
            self.backend.encrypted_zero()
        }
    }

    /// Recomputes the encrypted aggregate of a batch from the ledger.
    pub fn aggregate(&self, batch_id: BatchId) -> NegotiationResult<EncryptedAggregate> {
        aggregate_batch(&self.backend, &self.ledger, batch_id)
    }

    /// Commits to the aggregate of a closed batch and hands it to the oracle.
    /// Does not wait for the result.
    pub fn request_decryption_for_batch(
        &mut self,
        caller: &Identity,
        batch_id: BatchId,
        now: Timestamp,
    ) -> NegotiationResult<RequestId> {
        let result = self.try_request(caller, batch_id, now);
        self.observe("request_decryption_for_batch", caller, result)
    }

    fn try_request(
        &mut self,
        caller: &Identity,
        batch_id: BatchId,
        now: Timestamp,
    ) -> NegotiationResult<RequestId> {
        self.access.ensure_provider(caller)?;
        self.access.ensure_not_paused()?;
        self.access
            .ensure_cooldown(caller, ActionKind::DecryptionRequest, now)?;
        self.ledger.ensure_closed(batch_id)?;

        let aggregate = self.aggregate(batch_id)?;
        let commitment = layout::commitment(&aggregate, &self.system_identity);
        let slots: Vec<Ciphertext> = layout::request_slots(&aggregate)
            .into_iter()
            .cloned()
            .collect();
        let request_id = self.oracle.request_decryption(&slots)?;
        if self.contexts.contains_key(&request_id) {
            let err = NegotiationError::from(OracleError::ReusedRequestId(request_id));
            error!(%request_id, batch_id, error = %err, "oracle reissued a tracked request id");
            self.sink.alert(IntegrityAlert {
                at: now,
                request_id,
                batch_id: Some(batch_id),
                reason: err.to_string(),
            });
            return Err(err);
        }

        self.contexts.insert(
            request_id,
            DecryptionContext {
                batch_id,
                commitment,
                processed: false,
            },
        );
        self.access
            .record_action(caller, ActionKind::DecryptionRequest, now);
        info!(
            %request_id,
            batch_id,
            %commitment,
            contributors = aggregate.contributors,
            "decryption requested"
        );
        self.emit(
            now,
            NegotiationEvent::DecryptionRequested {
                request_id,
                batch_id,
                commitment,
            },
        );
        Ok(request_id)
    }

    /// Callback entry point for the oracle. Integrity failures are logged at
    /// error level and raised as operator alerts; the context stays unprocessed.
    pub fn on_decryption_result(
        &mut self,
        request_id: RequestId,
        cleartexts: &[u8],
        proof: &[u8],
        now: Timestamp,
    ) -> NegotiationResult<ClearAggregate> {
        let result = self.try_complete(request_id, cleartexts, proof, now);
        if let Err(err) = &result {
            let batch_id = self.contexts.get(&request_id).map(|ctx| ctx.batch_id);
            if err.is_integrity_violation() {
                error!(%request_id, ?batch_id, error = %err, "decryption callback rejected");
                self.sink.alert(IntegrityAlert {
                    at: now,
                    request_id,
                    batch_id,
                    reason: err.to_string(),
                });
            } else {
                warn!(%request_id, ?batch_id, error = %err, "decryption callback failed");
            }
        }
        result
    }

    fn try_complete(
        &mut self,
        request_id: RequestId,
        cleartexts: &[u8],
        proof: &[u8],
        now: Timestamp,
    ) -> NegotiationResult<ClearAggregate> {
        let context = self
            .contexts
            .get(&request_id)
            .cloned()
            .ok_or(NegotiationError::UnknownRequest { request_id })?;
        if context.processed {
            return Err(NegotiationError::ReplayAttempt { request_id });
        }

        let batch_id = context.batch_id;
        let recomputed = self
            .aggregate(batch_id)
            .map(|aggregate| layout::commitment(&aggregate, &self.system_identity));
        match recomputed {
            Ok(commitment) if commitment == context.commitment => {}
            Ok(commitment) => {
                debug!(%request_id, expected = %context.commitment, actual = %commitment, "commitment drift");
                return Err(NegotiationError::StateMismatch {
                    request_id,
                    batch_id,
                });
            }
            Err(err) => {
                debug!(%request_id, error = %err, "aggregate could not be recomputed");
                return Err(NegotiationError::StateMismatch {
                    request_id,
                    batch_id,
                });
            }
        }

        if !self.oracle.verify_proof(request_id, cleartexts, proof) {
            return Err(NegotiationError::InvalidProof { request_id });
        }
        let clear = layout::decode_aggregate(cleartexts)
            .map_err(|source| NegotiationError::MalformedCleartexts { request_id, source })?;

        if let Some(context) = self.contexts.get_mut(&request_id) {
            context.processed = true;
        }
        self.results.insert(request_id, clear);
        info!(%request_id, batch_id, "decryption completed");
        self.emit(
            now,
            NegotiationEvent::DecryptionCompleted {
                request_id,
                batch_id,
                target_sum: clear.target,
                floor_sum: clear.floor,
            },
        );
        Ok(clear)
    }

    fn observe<T>(
        &self,
        operation: &'static str,
        caller: &Identity,
        result: NegotiationResult<T>,
    ) -> NegotiationResult<T> {
        if let Err(err) = &result {
            warn!(operation, %caller, class = ?err.class(), error = %err, "operation rejected");
        }
        result
    }

    fn emit(&mut self, at: Timestamp, event: NegotiationEvent) {
        self.sequence += 1;
        debug!(sequence = self.sequence, ?event, "event");
        self.sink.emit(EventRecord {
            sequence: self.sequence,
            at,
            event,
        });
    }
}

// Read-only query surface.
impl<B, O> NegotiationEngine<B, O> {
    pub fn system_identity(&self) -> &str {
        &self.system_identity
    }

    pub fn owner(&self) -> &Identity {
        self.access.owner()
    }

    pub fn is_provider(&self, identity: &Identity) -> bool {
        self.access.is_provider(identity)
    }

    pub fn is_paused(&self) -> bool {
        self.access.is_paused()
    }

    pub fn cooldown_seconds(&self) -> u64 {
        self.access.cooldown_seconds()
    }

    pub fn last_action(&self, identity: &Identity, action: ActionKind) -> Option<Timestamp> {
        self.access.last_action(identity, action)
    }

    pub fn current_batch_id(&self) -> BatchId {
        self.ledger.current_batch_id()
    }

    pub fn is_batch_closed(&self, batch_id: BatchId) -> Option<bool> {
        self.ledger.is_closed(batch_id)
    }

    pub fn batch(&self, batch_id: BatchId) -> Option<BatchSummary> {
        self.ledger.summary(batch_id)
    }

    pub fn entry(&self, batch_id: BatchId, submitter: &Identity) -> Option<&NegotiationEntry> {
        self.ledger.entry(batch_id, submitter)
    }

    pub fn submitters(&self, batch_id: BatchId) -> &[Identity] {
        self.ledger.submitters(batch_id)
    }

    pub fn decryption_context(&self, request_id: RequestId) -> Option<&DecryptionContext> {
        self.contexts.get(&request_id)
    }

    pub fn decryption_result(&self, request_id: RequestId) -> Option<ClearAggregate> {
        self.results.get(&request_id).copied()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Live state in the same shape [`StateProjection::replay`] produces.
    pub fn query_surface(&self) -> StateProjection {
        let current_batch_id = self.ledger.current_batch_id();
        let mut state = StateProjection {
            owner: Some(self.access.owner().clone()),
            providers: self.access.providers().cloned().collect(),
            paused: self.access.is_paused(),
            cooldown_seconds: self.access.cooldown_seconds(),
            current_batch_id,
            contexts: self
                .contexts
                .iter()
                .map(|(id, ctx)| (*id, ctx.clone()))
                .collect(),
            results: self.results.iter().map(|(id, clear)| (*id, *clear)).collect::<BTreeMap<_, _>>(),
            ..StateProjection::default()
        };
        for batch_id in 1..=current_batch_id {
            if self.ledger.is_closed(batch_id) == Some(true) {
                state.closed_batches.insert(batch_id);
            }
            for (who, entry) in self.ledger.entries_in_order(batch_id) {
                state
                    .entries
                    .insert((batch_id, who.clone()), entry.clone());
            }
        }
        state
    }
}
