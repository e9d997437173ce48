// relia-core/tests/state.rs
// ============================================================================
// Module: State Machine Tests
// Description: Plan table and idempotency key derivation.
// ============================================================================
//! ## Overview
//! Sweeps the authorize plan table and pins the idempotency key's stability
//! and sensitivity properties.

use serde_json::json;

use relia_core::ApprovalStatus;
use relia_core::IdemKeyInput;
use relia_core::IdemStatus;
use relia_core::NextAction;
use relia_core::PlanError;
use relia_core::Verdict;
use relia_core::compute_idem_key;
use relia_core::determine_next_action;
use relia_core::plan_authorize;
use relia_core::transition_from_verdict;

// ============================================================================
// SECTION: Plan Table
// ============================================================================

/// Tests every row of the plan table.
#[test]
fn test_plan_table_rows() {
    use ApprovalStatus::{Approved, Denied, Pending};
    use IdemStatus as I;
    use NextAction as A;

    let cases = [
        (None, None, A::EvaluatePolicy),
        (Some(I::Allowed), None, A::ReturnFinal),
        (Some(I::Denied), None, A::ReturnDenied),
        (Some(I::Errored), None, A::ReturnErrored),
        (Some(I::Issuing), None, A::ReturnErrored),
        (Some(I::ApprovedReady), None, A::IssueCredentials),
        (Some(I::PendingApproval), None, A::EvaluatePolicy),
        (Some(I::PendingApproval), Some(Pending), A::ReturnPending),
        (Some(I::PendingApproval), Some(Denied), A::ReturnDenied),
        (Some(I::PendingApproval), Some(Approved), A::IssueCredentials),
    ];
    for (idem, approval, expected) in cases {
        assert_eq!(
            determine_next_action(idem, approval),
            expected,
            "idem={idem:?} approval={approval:?}"
        );
    }
}

/// Tests the verdict-to-status transitions.
#[test]
fn test_transition_from_verdict() {
    assert_eq!(
        transition_from_verdict(Verdict::Deny),
        (IdemStatus::Denied, NextAction::ReturnDenied)
    );
    assert_eq!(
        transition_from_verdict(Verdict::RequireApproval),
        (IdemStatus::PendingApproval, NextAction::ReturnPending)
    );
    assert_eq!(
        transition_from_verdict(Verdict::Allow),
        (IdemStatus::Issuing, NextAction::IssueCredentials)
    );
}

/// Tests that planning without a verdict fails only when evaluating.
#[test]
fn test_plan_requires_verdict_for_evaluation() {
    assert_eq!(
        plan_authorize(None, None, None),
        Err(PlanError::MissingVerdict)
    );

    let plan = plan_authorize(None, None, Some(Verdict::RequireApproval)).unwrap();
    assert_eq!(plan.next_action, NextAction::ReturnPending);
    assert_eq!(plan.idem_status, IdemStatus::PendingApproval);

    let cached = plan_authorize(Some(IdemStatus::Allowed), None, None).unwrap();
    assert_eq!(cached.next_action, NextAction::ReturnFinal);
    assert_eq!(cached.idem_status, IdemStatus::Allowed);
}

/// Tests status string round-trips and unknown rejection.
#[test]
fn test_status_string_round_trip() {
    for status in [
        IdemStatus::PendingApproval,
        IdemStatus::ApprovedReady,
        IdemStatus::Issuing,
        IdemStatus::Allowed,
        IdemStatus::Denied,
        IdemStatus::Errored,
    ] {
        assert_eq!(IdemStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(IdemStatus::parse("weird"), None);
}

// ============================================================================
// SECTION: Idempotency Key
// ============================================================================

fn base_input<'a>(intent: Option<&'a serde_json::Value>) -> IdemKeyInput<'a> {
    IdemKeyInput {
        subject: "repo:org/repo:ref:refs/heads/main",
        repo: "org/repo",
        workflow: "terraform-prod",
        run_id: "123456",
        sha: "abcdef123",
        action: "terraform.apply",
        resource: "res",
        env: "prod",
        request_id: "req-1",
        intent,
    }
}

/// Tests that the key is stable across retries of the same request.
#[test]
fn test_idem_key_stable() {
    let a = compute_idem_key(&base_input(None)).unwrap();
    let b = compute_idem_key(&base_input(None)).unwrap();
    assert_eq!(a, b);
    assert!(a.as_str().starts_with("sha256:"));
}

/// Tests that changing any naming field changes the key.
#[test]
fn test_idem_key_sensitive_to_every_field() {
    let baseline = compute_idem_key(&base_input(None)).unwrap();

    let variants = [
        IdemKeyInput {
            subject: "other",
            ..base_input(None)
        },
        IdemKeyInput {
            repo: "org/other",
            ..base_input(None)
        },
        IdemKeyInput {
            workflow: "other",
            ..base_input(None)
        },
        IdemKeyInput {
            run_id: "999",
            ..base_input(None)
        },
        IdemKeyInput {
            sha: "ffffff",
            ..base_input(None)
        },
        IdemKeyInput {
            action: "terraform.plan",
            ..base_input(None)
        },
        IdemKeyInput {
            resource: "other",
            ..base_input(None)
        },
        IdemKeyInput {
            env: "dev",
            ..base_input(None)
        },
        IdemKeyInput {
            request_id: "req-2",
            ..base_input(None)
        },
    ];
    for (index, variant) in variants.iter().enumerate() {
        assert_ne!(
            compute_idem_key(variant).unwrap(),
            baseline,
            "variant {index} must change the key"
        );
    }

    let intent = json!({"change": "scale up"});
    assert_ne!(compute_idem_key(&base_input(Some(&intent))).unwrap(), baseline);
}

/// Tests that float-bearing intent is rejected at key derivation.
#[test]
fn test_idem_key_rejects_float_intent() {
    let intent = json!({"ratio": 0.5});
    assert!(compute_idem_key(&base_input(Some(&intent))).is_err());
}
