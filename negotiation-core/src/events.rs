//! Append-only domain events and operator alerts.
//!
//! The event stream alone is enough to rebuild the query surface; see
//! [`StateProjection`](crate::projection::StateProjection).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    backend::Ciphertext,
    types::{BatchId, Commitment, Identity, RequestId, Timestamp},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NegotiationEvent {
    OwnershipTransferred {
        previous: Option<Identity>,
        new_owner: Identity,
    },
    ProviderAdded {
        provider: Identity,
    },
    ProviderRemoved {
        provider: Identity,
    },
    Paused {
        by: Identity,
    },
    Unpaused {
        by: Identity,
    },
    CooldownUpdated {
        previous: u64,
        cooldown_seconds: u64,
    },
    BatchOpened {
        batch_id: BatchId,
    },
    BatchClosed {
        batch_id: BatchId,
    },
    NegotiationSubmitted {
        batch_id: BatchId,
        submitter: Identity,
        target: Ciphertext,
        floor: Ciphertext,
    },
    DecryptionRequested {
        request_id: RequestId,
        batch_id: BatchId,
        commitment: Commitment,
    },
    DecryptionCompleted {
        request_id: RequestId,
        batch_id: BatchId,
        target_sum: u32,
        floor_sum: u32,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub at: Timestamp,
    #[serde(flatten)]
    pub event: NegotiationEvent,
}

/// Raised on every protocol-integrity failure of a decryption callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityAlert {
    pub at: Timestamp,
    pub request_id: RequestId,
    pub batch_id: Option<BatchId>,
    pub reason: String,
}

/// Receives events after the state change they describe has been applied.
/// Implementations must not fail; a sink that can fail should buffer.
pub trait EventSink: Send + Sync {
    fn emit(&self, record: EventRecord);

    fn alert(&self, _alert: IntegrityAlert) {}
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn emit(&self, record: EventRecord) {
        (**self).emit(record)
    }

    fn alert(&self, alert: IntegrityAlert) {
        (**self).alert(alert)
    }
}

/// In-memory append-only log.
#[derive(Default)]
pub struct EventLog {
    records: Mutex<Vec<EventRecord>>,
    alerts: Mutex<Vec<IntegrityAlert>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    pub fn alerts(&self) -> Vec<IntegrityAlert> {
        self.alerts.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records since (and excluding) `sequence`.
    pub fn since(&self, sequence: u64) -> Vec<EventRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.sequence > sequence)
            .cloned()
            .collect()
    }

    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for record in self.records.lock().iter() {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl EventSink for EventLog {
    fn emit(&self, record: EventRecord) {
        self.records.lock().push(record);
    }

    fn alert(&self, alert: IntegrityAlert) {
        self.alerts.lock().push(alert);
    }
}
