use std::path::PathBuf;

use negotiation_core::{ErrorClass, RequestId, StateProjection};
use negotiation_node::config::{load_config, ConfigFormat};
use negotiation_node::scenario::load_scenario;
use negotiation_node::service::{NodeService, StepStatus};
use pretty_assertions::assert_eq;
use serde_json::json;

fn manifest_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(relative)
}

#[test]
fn shipped_configs_agree() {
    let toml = load_config(&manifest_path("configs/negotiation-node.toml"), ConfigFormat::Auto)
        .expect("toml config");
    let yaml = load_config(&manifest_path("configs/negotiation-node.yaml"), ConfigFormat::Auto)
        .expect("yaml config");
    assert_eq!(toml, yaml);
    assert_eq!(toml.oracle.first_request_id, 7);
}

#[test]
fn end_to_end_scenario_matches_expected_outcomes() {
    let config = load_config(&manifest_path("configs/negotiation-node.toml"), ConfigFormat::Toml)
        .expect("config");
    let scenario = load_scenario(&manifest_path("scenarios/end_to_end.json")).expect("scenario");
    let mut service = NodeService::from_config(&config, scenario.genesis_at).expect("service");
    let report = service.run(&scenario, false).expect("run");

    let failed: Vec<(usize, Option<ErrorClass>)> = report
        .outcomes
        .iter()
        .filter_map(|outcome| match &outcome.status {
            StepStatus::Failed { class, .. } => Some((outcome.index, *class)),
            StepStatus::Ok { .. } => None,
        })
        .collect();
    assert_eq!(
        failed,
        vec![
            (2, Some(ErrorClass::Authorization)),
            (4, Some(ErrorClass::RateLimit)),
            (7, Some(ErrorClass::ProtocolIntegrity)),
            (9, Some(ErrorClass::ProtocolIntegrity)),
            (12, Some(ErrorClass::Lifecycle)),
        ]
    );

    assert_eq!(
        report.outcomes[6].status,
        StepStatus::Ok {
            detail: json!({ "request_id": 7 })
        }
    );
    assert_eq!(
        report.outcomes[8].status,
        StepStatus::Ok {
            detail: json!({ "request_id": 7, "target_sum": 300, "floor_sum": 130 })
        }
    );
    assert_eq!(
        report.outcomes[17].status,
        StepStatus::Ok {
            detail: json!({ "request_id": 8, "target_sum": 0, "floor_sum": 10 })
        }
    );

    let alerted: Vec<RequestId> = report.alerts.iter().map(|alert| alert.request_id).collect();
    assert_eq!(alerted, vec![RequestId(7), RequestId(7)]);

    let engine = service.engine();
    assert_eq!(StateProjection::replay(&report.events), engine.query_surface());
    assert!(engine.decryption_context(RequestId(8)).unwrap().processed);
    assert_eq!(report.events[0].at, 1_000);
}

#[test]
fn fail_fast_stops_at_first_rejection() {
    let config = load_config(&manifest_path("configs/negotiation-node.toml"), ConfigFormat::Auto)
        .expect("config");
    let scenario = load_scenario(&manifest_path("scenarios/end_to_end.json")).expect("scenario");
    let mut service = NodeService::from_config(&config, scenario.genesis_at).expect("service");
    let err = service.run(&scenario, true).unwrap_err();
    assert_eq!(
        err.to_string(),
        "step 2 (submit) failed: did:negotiation:provider-c is not a registered provider"
    );
    assert_eq!(service.engine().submitters(1).len(), 2);
}
