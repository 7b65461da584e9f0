//! Status persistence: events, conflict retries and metrics.

mod common;

use authpolicy_controller::controller::reconciler::events::reasons;
use authpolicy_controller::controller::reconciler::status::StatusError;
use authpolicy_controller::controller::reconciler::ReconcilerError;
use authpolicy_controller::crd::Phase;
use common::{Harness, MINIMAL_SPEC};

#[tokio::test]
async fn test_status_write_emits_started_and_success() {
    let harness = Harness::new();
    harness.seed_policy(MINIMAL_SPEC);

    harness.reconcile().await.expect("pass");

    assert_eq!(
        harness.events.reasons(),
        vec![
            reasons::STATUS_UPDATE_STARTED.to_string(),
            reasons::STATUS_UPDATE_SUCCESS.to_string()
        ]
    );
    assert!(harness.events.events().iter().all(|e| e.action == "Reconcile"));
    assert!(harness.events.events().iter().all(|e| !e.warning));
}

#[tokio::test]
async fn test_conflicting_status_write_is_retried() {
    let harness = Harness::new();
    harness.seed_policy(MINIMAL_SPEC);
    harness.store().conflict_next_status_writes(2);

    harness.reconcile().await.expect("pass");

    let status = harness.policy().status.expect("status written after retries");
    assert_eq!(status.phase, Some(Phase::Ready));
    assert_eq!(
        harness.events.reasons().last().map(String::as_str),
        Some(reasons::STATUS_UPDATE_SUCCESS)
    );
}

#[tokio::test]
async fn test_exhausted_status_retries_fail_the_pass() {
    let harness = Harness::new();
    harness.seed_policy(MINIMAL_SPEC);
    harness
        .store()
        .conflict_next_status_writes(harness.ctx.config.status_retry_attempts);

    let result = harness.reconcile().await;

    assert!(matches!(
        result,
        Err(ReconcilerError::Status(StatusError::Conflict { .. }))
    ));
    assert!(harness.policy().status.is_none());
    let last = harness.events.events().pop().expect("failure event");
    assert!(last.warning);
    assert_eq!(last.reason, reasons::STATUS_UPDATE_FAILED);
}

#[tokio::test]
async fn test_unchanged_transition_time_is_kept() {
    let harness = Harness::new();
    harness.seed_policy(MINIMAL_SPEC);
    harness.reconcile().await.expect("first pass");
    let first = harness.policy().status.expect("status").conditions[0].clone();

    harness.reconcile().await.expect("second pass");
    let second = harness.policy().status.expect("status").conditions[0].clone();

    assert_eq!(first.r#type, second.r#type);
    assert_eq!(first.last_transition_time, second.last_transition_time);
}

#[tokio::test]
async fn test_metrics_track_passes_and_policy_info() {
    let harness = Harness::new();
    harness.seed_policy(MINIMAL_SPEC);

    harness.reconcile().await.expect("pass");

    let text = harness.ctx.metrics.encode().expect("encode");
    assert!(text.contains("authpolicy_reconciliations_total 1"));
    assert!(text.contains("authpolicy_info{"));
    assert!(text.contains("issuer=\"https://idp.example.com\""));
    assert!(text.contains("state=\"Ready\""));
}
