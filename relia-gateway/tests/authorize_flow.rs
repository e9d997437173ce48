// relia-gateway/tests/authorize_flow.rs
// ============================================================================
// Module: Authorize Flow Tests
// Description: End-to-end state machine scenarios over the in-memory ledger.
// ============================================================================
//! ## Overview
//! Drives the authorize and approval flows through their main scenarios:
//! direct allow, idempotent retry, approval gating with outbox creation,
//! approve-then-issue chains, denial, and the cached error branches.

mod common;

use relia_core::ApprovalId;
use relia_core::ApprovalStatus;
use relia_core::IdemKey;
use relia_core::IdemKeyInput;
use relia_core::IdemKeyRow;
use relia_core::OutboxStatus;
use relia_core::OutcomeStatus;
use relia_core::compute_idem_key;
use relia_gateway::service::ServiceError;

use common::CREATED_AT;
use common::claims;
use common::request;
use common::test_service;

fn idem_key_for(request: &relia_gateway::service::AuthorizeRequest) -> IdemKey {
    let claims = claims();
    compute_idem_key(&IdemKeyInput {
        subject: &claims.subject,
        repo: &claims.repo,
        workflow: &claims.workflow,
        run_id: &claims.run_id,
        sha: &claims.sha,
        action: &request.action,
        resource: &request.resource,
        env: &request.env,
        request_id: &request.request_id,
        intent: request.intent.as_ref(),
    })
    .unwrap()
}

// ============================================================================
// SECTION: Allow Path
// ============================================================================

/// Tests the direct allow path: issued credentials, persisted chain, valid
/// signature.
#[test]
fn test_allow_path_issues_credentials() {
    let (_dir, service) = test_service();

    let response = service
        .authorize(&claims(), &request("terraform.apply", "res", "dev", "req-1"), CREATED_AT)
        .unwrap();

    assert_eq!(response.verdict, "allow");
    assert!(response.error.is_none());
    assert!(!response.receipt_id.is_empty());

    let receipt = service
        .ledger()
        .get_receipt(&response.receipt_id)
        .unwrap()
        .unwrap();
    assert_eq!(receipt.outcome_status, OutcomeStatus::IssuedCredentials);
    assert!(receipt.is_final);
    assert!(receipt.supersedes_receipt_id.is_some());

    // The superseded receipt records the issuing step.
    let prior = service
        .ledger()
        .get_receipt(receipt.supersedes_receipt_id.as_ref().unwrap().as_str())
        .unwrap()
        .unwrap();
    assert_eq!(prior.outcome_status, OutcomeStatus::IssuingCredentials);

    let outcome = service.verify(&response.receipt_id).unwrap();
    assert!(outcome.valid);
    assert!(outcome.grade.is_some());

    let idem = service
        .ledger()
        .get_idem_key(receipt.idem_key.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(idem.status, "allowed");
    assert_eq!(
        idem.final_receipt_id.as_ref().map(|id| id.as_str()),
        Some(response.receipt_id.as_str())
    );
}

/// Tests that an identical retry returns the same receipt.
#[test]
fn test_identical_retry_is_idempotent() {
    let (_dir, service) = test_service();
    let req = request("terraform.apply", "res", "dev", "req-1");

    let first = service.authorize(&claims(), &req, CREATED_AT).unwrap();
    let second = service.authorize(&claims(), &req, CREATED_AT).unwrap();
    assert_eq!(first.receipt_id, second.receipt_id);
    assert_eq!(second.verdict, "allow");

    // A different request id is a different logical operation.
    let other = service
        .authorize(&claims(), &request("terraform.apply", "res", "dev", "req-2"), CREATED_AT)
        .unwrap();
    assert_ne!(other.receipt_id, first.receipt_id);
}

// ============================================================================
// SECTION: Denial
// ============================================================================

/// Tests that an unmatched prod action denies with a terminal receipt.
#[test]
fn test_unmatched_prod_action_denied() {
    let (_dir, service) = test_service();

    let response = service
        .authorize(&claims(), &request("deploy.service", "res", "prod", "req-1"), CREATED_AT)
        .unwrap();
    assert_eq!(response.verdict, "deny");

    let receipt = service
        .ledger()
        .get_receipt(&response.receipt_id)
        .unwrap()
        .unwrap();
    assert_eq!(receipt.outcome_status, OutcomeStatus::Denied);
    assert!(receipt.is_final);

    let retry = service
        .authorize(&claims(), &request("deploy.service", "res", "prod", "req-1"), CREATED_AT)
        .unwrap();
    assert_eq!(retry.verdict, "deny");
    assert_eq!(retry.receipt_id, response.receipt_id);
}

// ============================================================================
// SECTION: Approval Gating
// ============================================================================

/// Tests that a prod apply parks behind an approval with an outbox row.
#[test]
fn test_prod_apply_requires_approval_and_queues_notification() {
    let (_dir, service) = test_service();

    let response = service
        .authorize(&claims(), &request("terraform.apply", "res", "prod", "req-1"), CREATED_AT)
        .unwrap();
    assert_eq!(response.verdict, "require_approval");
    let stub = response.approval.expect("approval stub");
    assert_eq!(stub.status, "pending");

    let approval = service
        .ledger()
        .get_approval(stub.approval_id.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(approval.status, ApprovalStatus::Pending);

    let outbox = service
        .ledger()
        .get_outbox(&format!("slack:{}", stub.approval_id))
        .unwrap()
        .unwrap();
    assert_eq!(outbox.status, OutboxStatus::Pending);
    assert_eq!(outbox.channel, "C-approvals");
    assert_eq!(outbox.attempt_count, 0);

    // A pending retry replays the same pending response.
    let retry = service
        .authorize(&claims(), &request("terraform.apply", "res", "prod", "req-1"), CREATED_AT)
        .unwrap();
    assert_eq!(retry.verdict, "require_approval");
    assert_eq!(retry.receipt_id, response.receipt_id);
    assert_eq!(
        retry.approval.expect("approval stub").approval_id,
        stub.approval_id
    );
}

/// Tests approve-then-issue: superseding chain, allowed key, valid receipt.
#[test]
fn test_approve_then_issue_chain() {
    let (_dir, service) = test_service();
    let req = request("terraform.apply", "res", "prod", "req-1");

    let pending = service.authorize(&claims(), &req, CREATED_AT).unwrap();
    let stub = pending.approval.expect("approval stub");

    let approved_at = "2025-12-20T16:40:00Z";
    let final_receipt = service
        .approve(&stub.approval_id, ApprovalStatus::Approved, approved_at, None)
        .unwrap();

    let receipt = service
        .ledger()
        .get_receipt(final_receipt.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(receipt.outcome_status, OutcomeStatus::IssuedCredentials);
    assert!(receipt.supersedes_receipt_id.is_some());

    let idem = service
        .ledger()
        .get_idem_key(receipt.idem_key.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(idem.status, "allowed");

    assert!(service.verify(final_receipt.as_str()).unwrap().valid);

    // Walking supersedes from the final receipt reaches the pending receipt.
    let mut cursor = receipt.clone();
    let mut chain = vec![cursor.receipt_id.clone()];
    while let Some(previous) = cursor.supersedes_receipt_id.clone() {
        cursor = service
            .ledger()
            .get_receipt(previous.as_str())
            .unwrap()
            .unwrap();
        chain.push(cursor.receipt_id.clone());
    }
    assert_eq!(cursor.receipt_id.as_str(), pending.receipt_id);
    assert!(chain.len() >= 2);

    // Re-approving with the same verdict replays the same follow-up.
    let replay = service
        .approve(&stub.approval_id, ApprovalStatus::Approved, approved_at, None)
        .unwrap();
    assert_eq!(replay, final_receipt);

    // The caller's retry now sees the cached allowed outcome.
    let retry = service.authorize(&claims(), &req, CREATED_AT).unwrap();
    assert_eq!(retry.verdict, "allow");
    assert_eq!(retry.receipt_id, final_receipt.as_str());
}

/// Tests approval denial: terminal deny, cached on retry.
#[test]
fn test_approval_denied_is_terminal() {
    let (_dir, service) = test_service();
    let req = request("terraform.apply", "res", "prod", "req-1");

    let pending = service.authorize(&claims(), &req, CREATED_AT).unwrap();
    let stub = pending.approval.expect("approval stub");

    let denied_receipt = service
        .approve(&stub.approval_id, ApprovalStatus::Denied, "2025-12-20T16:40:00Z", None)
        .unwrap();

    let receipt = service
        .ledger()
        .get_receipt(denied_receipt.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(receipt.outcome_status, OutcomeStatus::Denied);
    assert!(receipt.is_final);

    let retry = service.authorize(&claims(), &req, CREATED_AT).unwrap();
    assert_eq!(retry.verdict, "deny");
    assert_eq!(retry.receipt_id, denied_receipt.as_str());
}

/// Tests that conflicting re-finalization is rejected without mutation.
#[test]
fn test_conflicting_reapproval_rejected() {
    let (_dir, service) = test_service();
    let req = request("terraform.apply", "res", "prod", "req-1");

    let pending = service.authorize(&claims(), &req, CREATED_AT).unwrap();
    let stub = pending.approval.expect("approval stub");

    service
        .approve(&stub.approval_id, ApprovalStatus::Denied, "2025-12-20T16:40:00Z", None)
        .unwrap();

    let conflict = service.approve(
        &stub.approval_id,
        ApprovalStatus::Approved,
        "2025-12-20T16:41:00Z",
        None,
    );
    assert!(matches!(conflict, Err(ServiceError::InvalidTransition(_))));

    let approval = service
        .ledger()
        .get_approval(stub.approval_id.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(approval.status, ApprovalStatus::Denied);
}

/// Tests that finalizing an unknown approval is not found.
#[test]
fn test_unknown_approval_not_found() {
    let (_dir, service) = test_service();
    let result = service.approve(
        &ApprovalId::new("approval-missing"),
        ApprovalStatus::Approved,
        CREATED_AT,
        None,
    );
    assert!(matches!(result, Err(ServiceError::NotFound("approval"))));
}

// ============================================================================
// SECTION: Cached Error Branches
// ============================================================================

/// Tests the issuing, errored, and unknown-status branches.
#[test]
fn test_cached_error_branches() {
    let (_dir, service) = test_service();
    let req = request("terraform.apply", "res", "prod", "req-1");
    let idem_key = idem_key_for(&req);

    let seed = |status: &str| IdemKeyRow {
        idem_key: idem_key.clone(),
        status: status.to_string(),
        approval_id: None,
        latest_receipt_id: None,
        final_receipt_id: None,
        created_at: CREATED_AT.to_string(),
        updated_at: CREATED_AT.to_string(),
        ttl_expires_at: None,
    };

    service.ledger().put_idem_key(&seed("issuing")).unwrap();
    let response = service.authorize(&claims(), &req, CREATED_AT).unwrap();
    assert_eq!(response.error.as_deref(), Some("issuing in progress"));
    assert!(response.receipt_id.is_empty());

    service.ledger().put_idem_key(&seed("errored")).unwrap();
    let response = service.authorize(&claims(), &req, CREATED_AT).unwrap();
    assert_eq!(response.error.as_deref(), Some("previous error"));
    assert_eq!(response.verdict, "deny");

    service.ledger().put_idem_key(&seed("weird")).unwrap();
    let response = service.authorize(&claims(), &req, CREATED_AT).unwrap();
    assert_eq!(response.error.as_deref(), Some("unsupported state"));
}

/// Tests the approved-ready inconsistency guards.
#[test]
fn test_approved_ready_guards() {
    let (_dir, service) = test_service();
    let req = request("terraform.apply", "res", "dev", "req-1");
    let idem_key = idem_key_for(&req);

    // Missing latest receipt.
    service
        .ledger()
        .put_idem_key(&IdemKeyRow {
            idem_key: idem_key.clone(),
            status: "approved_ready".to_string(),
            approval_id: None,
            latest_receipt_id: None,
            final_receipt_id: None,
            created_at: CREATED_AT.to_string(),
            updated_at: CREATED_AT.to_string(),
            ttl_expires_at: None,
        })
        .unwrap();
    let result = service.authorize(&claims(), &req, CREATED_AT);
    assert!(matches!(result, Err(ServiceError::State(_))));
}
