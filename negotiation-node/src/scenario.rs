//! Scripted protocol runs. A scenario is a JSON document:
//!
//! ```json
//! {
//!   "genesis_at": 0,
//!   "steps": [
//!     { "op": "submit", "caller": "did:p1", "batch_id": 1, "target": 100, "floor": 50, "at": 10 },
//!     { "op": "close_batch", "caller": "did:owner", "batch_id": 1, "at": 11 },
//!     { "op": "request_decryption", "caller": "did:p1", "batch_id": 1, "at": 12 },
//!     { "op": "fulfill", "at": 13 }
//!   ]
//! }
//! ```
//!
//! `fulfill`, `forge` and `replay` default to the most recent request id.

use std::{
    fs,
    path::{Path, PathBuf},
};

use negotiation_core::{BatchId, Identity, RequestId, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("unable to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Timestamp stamped on the engine's construction events.
    #[serde(default)]
    pub genesis_at: Timestamp,
    pub steps: Vec<ScenarioStep>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScenarioStep {
    AddProvider {
        caller: Identity,
        provider: Identity,
        at: Timestamp,
    },
    RemoveProvider {
        caller: Identity,
        provider: Identity,
        at: Timestamp,
    },
    TransferOwnership {
        caller: Identity,
        new_owner: Identity,
        at: Timestamp,
    },
    Pause {
        caller: Identity,
        at: Timestamp,
    },
    Unpause {
        caller: Identity,
        at: Timestamp,
    },
    SetCooldown {
        caller: Identity,
        seconds: u64,
        at: Timestamp,
    },
    OpenBatch {
        caller: Identity,
        at: Timestamp,
    },
    CloseBatch {
        caller: Identity,
        batch_id: BatchId,
        at: Timestamp,
    },
    /// `null` (or a missing value) submits an uninitialized handle.
    Submit {
        caller: Identity,
        batch_id: BatchId,
        #[serde(default)]
        target: Option<u32>,
        #[serde(default)]
        floor: Option<u32>,
        at: Timestamp,
    },
    RequestDecryption {
        caller: Identity,
        batch_id: BatchId,
        at: Timestamp,
    },
    Fulfill {
        #[serde(default)]
        request_id: Option<RequestId>,
        at: Timestamp,
    },
    Forge {
        #[serde(default)]
        request_id: Option<RequestId>,
        at: Timestamp,
    },
    Replay {
        #[serde(default)]
        request_id: Option<RequestId>,
        at: Timestamp,
    },
}

impl ScenarioStep {
    pub fn op(&self) -> &'static str {
        match self {
            Self::AddProvider { .. } => "add_provider",
            Self::RemoveProvider { .. } => "remove_provider",
            Self::TransferOwnership { .. } => "transfer_ownership",
            Self::Pause { .. } => "pause",
            Self::Unpause { .. } => "unpause",
            Self::SetCooldown { .. } => "set_cooldown",
            Self::OpenBatch { .. } => "open_batch",
            Self::CloseBatch { .. } => "close_batch",
            Self::Submit { .. } => "submit",
            Self::RequestDecryption { .. } => "request_decryption",
            Self::Fulfill { .. } => "fulfill",
            Self::Forge { .. } => "forge",
            Self::Replay { .. } => "replay",
        }
    }

    pub fn at(&self) -> Timestamp {
        match self {
            Self::AddProvider { at, .. }
            | Self::RemoveProvider { at, .. }
            | Self::TransferOwnership { at, .. }
            | Self::Pause { at, .. }
            | Self::Unpause { at, .. }
            | Self::SetCooldown { at, .. }
            | Self::OpenBatch { at, .. }
            | Self::CloseBatch { at, .. }
            | Self::Submit { at, .. }
            | Self::RequestDecryption { at, .. }
            | Self::Fulfill { at, .. }
            | Self::Forge { at, .. }
            | Self::Replay { at, .. } => *at,
        }
    }
}

pub fn parse_scenario(contents: &str) -> Result<Scenario, ScenarioError> {
    Ok(serde_json::from_str(contents)?)
}

pub fn load_scenario(path: &Path) -> Result<Scenario, ScenarioError> {
    let contents = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_scenario(&contents)
}
