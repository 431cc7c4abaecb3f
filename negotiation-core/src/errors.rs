use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    backend::BackendError,
    layout::LayoutError,
    oracle::OracleError,
    types::{ActionKind, BatchId, Identity, RequestId, Timestamp},
};

pub type NegotiationResult<T> = Result<T, NegotiationError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("{caller} is not the owner")]
    NotOwner { caller: Identity },
    #[error("{caller} is not a registered provider")]
    NotProvider { caller: Identity },
    #[error("operation rejected while paused")]
    PausedContract,
    #[error("already paused")]
    AlreadyPaused,
    #[error("not paused")]
    NotPaused,
    #[error("{action} cooldown active for {caller} until {retry_at}")]
    CooldownActive {
        caller: Identity,
        action: ActionKind,
        retry_at: Timestamp,
    },
    #[error("batch {batch_id} is closed or does not exist")]
    BatchClosedOrInvalid { batch_id: BatchId },
    #[error("batch {batch_id} does not exist")]
    InvalidBatchId { batch_id: BatchId },
    #[error("batch {batch_id} has no initialized entries")]
    EmptyAggregate { batch_id: BatchId },
    #[error("aggregate of batch {batch_id} no longer matches the commitment of {request_id}")]
    StateMismatch {
        request_id: RequestId,
        batch_id: BatchId,
    },
    #[error("{request_id} was already processed")]
    ReplayAttempt { request_id: RequestId },
    #[error("decryption proof rejected for {request_id}")]
    InvalidProof { request_id: RequestId },
    #[error("no decryption context for {request_id}")]
    UnknownRequest { request_id: RequestId },
    #[error("verified cleartexts for {request_id} are malformed: {source}")]
    MalformedCleartexts {
        request_id: RequestId,
        #[source]
        source: LayoutError,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Error taxonomy. Everything but `ProtocolIntegrity` and `Backend` is
/// caller-correctable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Authorization,
    Lifecycle,
    RateLimit,
    Data,
    ProtocolIntegrity,
    Backend,
}

impl NegotiationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NegotiationError::NotOwner { .. } | NegotiationError::NotProvider { .. } => {
                ErrorClass::Authorization
            }
            NegotiationError::PausedContract
            | NegotiationError::AlreadyPaused
            | NegotiationError::NotPaused
            | NegotiationError::BatchClosedOrInvalid { .. }
            | NegotiationError::InvalidBatchId { .. } => ErrorClass::Lifecycle,
            NegotiationError::CooldownActive { .. } => ErrorClass::RateLimit,
            NegotiationError::EmptyAggregate { .. } => ErrorClass::Data,
            NegotiationError::StateMismatch { .. }
            | NegotiationError::ReplayAttempt { .. }
            | NegotiationError::InvalidProof { .. }
            | NegotiationError::UnknownRequest { .. }
            | NegotiationError::MalformedCleartexts { .. } => ErrorClass::ProtocolIntegrity,
            NegotiationError::Backend(_) | NegotiationError::Oracle(_) => ErrorClass::Backend,
        }
    }

    /// Manipulation attempt or internal inconsistency. Never retry with the
    /// same inputs; route to an operator.
    pub fn is_integrity_violation(&self) -> bool {
        self.class() == ErrorClass::ProtocolIntegrity
    }
}
