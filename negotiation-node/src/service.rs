//! Drives a [`Scenario`] against an engine wired to the reference backend and
//! oracle, and collects a report of every step plus the resulting event log.
//!
//! # Example
//! ```
//! use negotiation_node::config::Config;
//! use negotiation_node::scenario::parse_scenario;
//! use negotiation_node::service::NodeService;
//!
//! let cfg = Config::sample();
//! let scenario = parse_scenario(r#"{ "steps": [
//!     { "op": "open_batch", "caller": "did:negotiation:owner", "at": 1 }
//! ] }"#).unwrap();
//! let mut service = NodeService::from_config(&cfg, scenario.genesis_at).unwrap();
//! let report = service.run(&scenario, false).unwrap();
//! assert_eq!(report.failures(), 0);
//! ```

use std::sync::Arc;

use negotiation_core::{
    Ciphertext, ErrorClass, EventLog, EventRecord, IntegrityAlert, MaskedAdditiveBackend,
    MockDecryptionOracle, NegotiationEngine, NegotiationError, OracleError, RequestId,
    Timestamp,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::{Config, ConfigError},
    scenario::{Scenario, ScenarioStep},
};

type Engine = NegotiationEngine<MaskedAdditiveBackend, Arc<MockDecryptionOracle>>;

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Protocol(#[from] NegotiationError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("no decryption request has been issued yet")]
    NoRequest,
}

impl StepError {
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Protocol(err) => Some(err.class()),
            Self::Oracle(_) | Self::NoRequest => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("step {index} ({op}) failed: {source}")]
    StepFailed {
        index: usize,
        op: &'static str,
        #[source]
        source: StepError,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Ok {
        #[serde(skip_serializing_if = "Value::is_null")]
        detail: Value,
    },
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        class: Option<ErrorClass>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub op: &'static str,
    pub at: Timestamp,
    #[serde(flatten)]
    pub status: StepStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<StepOutcome>,
    pub events: Vec<EventRecord>,
    pub alerts: Vec<IntegrityAlert>,
}

impl RunReport {
    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, StepStatus::Failed { .. }))
            .count()
    }
}

pub struct NodeService {
    engine: Engine,
    backend: MaskedAdditiveBackend,
    oracle: Arc<MockDecryptionOracle>,
    log: Arc<EventLog>,
    last_request: Option<RequestId>,
}

impl NodeService {
    pub fn from_config(config: &Config, genesis_at: Timestamp) -> Result<Self, ConfigError> {
        config.validate()?;
        let backend = MaskedAdditiveBackend::from_seed(config.backend_seed()?);
        let oracle = Arc::new(
            MockDecryptionOracle::new(backend.clone(), config.oracle_proof_key()?)
                .starting_at(config.oracle.first_request_id),
        );
        let log = Arc::new(EventLog::new());
        let engine = NegotiationEngine::new(
            config.engine.clone(),
            backend.clone(),
            oracle.clone(),
            log.clone(),
            genesis_at,
        )?;
        Ok(Self {
            engine,
            backend,
            oracle,
            log,
            last_request: None,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Runs every step in order. Failed steps are recorded and skipped unless
    /// `fail_fast` is set, in which case the first failure aborts the run.
    pub fn run(&mut self, scenario: &Scenario, fail_fast: bool) -> Result<RunReport, ServiceError> {
        let mut outcomes = Vec::with_capacity(scenario.steps.len());
        for (index, step) in scenario.steps.iter().enumerate() {
            let op = step.op();
            debug!(index, op, at = step.at(), "running step");
            let status = match self.execute(step) {
                Ok(detail) => StepStatus::Ok { detail },
                Err(source) if fail_fast => {
                    return Err(ServiceError::StepFailed { index, op, source })
                }
                Err(err) => StepStatus::Failed {
                    error: err.to_string(),
                    class: err.class(),
                },
            };
            outcomes.push(StepOutcome {
                index,
                op,
                at: step.at(),
                status,
            });
        }

        let report = RunReport {
            outcomes,
            events: self.log.records(),
            alerts: self.log.alerts(),
        };
        info!(
            steps = report.outcomes.len(),
            failures = report.failures(),
            events = report.events.len(),
            alerts = report.alerts.len(),
            "scenario finished"
        );
        Ok(report)
    }

    fn execute(&mut self, step: &ScenarioStep) -> Result<Value, StepError> {
        let detail = match step {
            ScenarioStep::AddProvider {
                caller,
                provider,
                at,
            } => json!({ "changed": self.engine.add_provider(caller, provider.clone(), *at)? }),
            ScenarioStep::RemoveProvider {
                caller,
                provider,
                at,
            } => json!({ "changed": self.engine.remove_provider(caller, provider, *at)? }),
            ScenarioStep::TransferOwnership {
                caller,
                new_owner,
                at,
            } => {
                self.engine
                    .transfer_ownership(caller, new_owner.clone(), *at)?;
                Value::Null
            }
            ScenarioStep::Pause { caller, at } => {
                self.engine.pause(caller, *at)?;
                Value::Null
            }
            ScenarioStep::Unpause { caller, at } => {
                self.engine.unpause(caller, *at)?;
                Value::Null
            }
            ScenarioStep::SetCooldown {
                caller,
                seconds,
                at,
            } => {
                self.engine.set_cooldown_seconds(caller, *seconds, *at)?;
                Value::Null
            }
            ScenarioStep::OpenBatch { caller, at } => {
                json!({ "batch_id": self.engine.open_batch(caller, *at)? })
            }
            ScenarioStep::CloseBatch {
                caller,
                batch_id,
                at,
            } => json!({ "changed": self.engine.close_batch(caller, *batch_id, *at)? }),
            ScenarioStep::Submit {
                caller,
                batch_id,
                target,
                floor,
                at,
            } => {
                let target = self.client_encrypt(*target);
                let floor = self.client_encrypt(*floor);
                self.engine
                    .submit_negotiation(caller, *batch_id, target, floor, *at)?;
                Value::Null
            }
            ScenarioStep::RequestDecryption {
                caller,
                batch_id,
                at,
            } => {
                let request_id = self
                    .engine
                    .request_decryption_for_batch(caller, *batch_id, *at)?;
                self.last_request = Some(request_id);
                json!({ "request_id": request_id })
            }
            ScenarioStep::Fulfill { request_id, at } => {
                let request_id = self.resolve(*request_id)?;
                let result = self.oracle.fulfill(request_id)?;
                self.deliver(request_id, &result.cleartexts, &result.proof, *at)?
            }
            ScenarioStep::Forge { request_id, at } => {
                let request_id = self.resolve(*request_id)?;
                let result = self.oracle.fulfill_forged(request_id)?;
                self.deliver(request_id, &result.cleartexts, &result.proof, *at)?
            }
            ScenarioStep::Replay { request_id, at } => {
                let request_id = self.resolve(*request_id)?;
                let result = self.oracle.redeliver(request_id)?;
                self.deliver(request_id, &result.cleartexts, &result.proof, *at)?
            }
        };
        Ok(detail)
    }

    fn client_encrypt(&self, value: Option<u32>) -> Ciphertext {
        value
            .map(|value| self.backend.encrypt(value))
            .unwrap_or_else(Ciphertext::uninitialized)
    }

    fn resolve(&self, request_id: Option<RequestId>) -> Result<RequestId, StepError> {
        request_id.or(self.last_request).ok_or(StepError::NoRequest)
    }

    fn deliver(
        &mut self,
        request_id: RequestId,
        cleartexts: &[u8],
        proof: &[u8],
        at: Timestamp,
    ) -> Result<Value, StepError> {
        let clear = self
            .engine
            .on_decryption_result(request_id, cleartexts, proof, at)?;
        Ok(json!({
            "request_id": request_id,
            "target_sum": clear.target,
            "floor_sum": clear.floor,
        }))
    }
}
