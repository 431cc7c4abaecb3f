//! Confidential negotiation batches. Providers submit encrypted target and
//! floor values into numbered batches; once a batch is closed its aggregate is
//! folded homomorphically, bound to a commitment, and handed to an external
//! decryption oracle. The oracle's callback is accepted only if the batch
//! still hashes to that commitment and the proof verifies, and only once.

pub mod access;
pub mod aggregate;
pub mod backend;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod layout;
pub mod ledger;
pub mod oracle;
pub mod projection;
pub mod shared;
pub mod types;

pub use aggregate::{aggregate_batch, EncryptedAggregate};
pub use backend::{BackendError, Ciphertext, HomomorphicBackend, MaskedAdditiveBackend};
pub use config::{ConfigError, EngineConfig};
pub use engine::NegotiationEngine;
pub use errors::{ErrorClass, NegotiationError, NegotiationResult};
pub use events::{EventLog, EventRecord, EventSink, IntegrityAlert, NegotiationEvent};
pub use layout::{ClearAggregate, LayoutError};
pub use ledger::{BatchSummary, NegotiationEntry};
pub use oracle::{
    DecryptionContext, DecryptionOracle, DecryptionResult, MockDecryptionOracle, OracleError,
};
pub use projection::StateProjection;
pub use shared::SharedEngine;
pub use types::{ActionKind, BatchId, Commitment, Identity, RequestId, Timestamp};
