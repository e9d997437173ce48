// relia-core/tests/receipt.rs
// ============================================================================
// Module: Receipt Tests
// Description: Digest identity and signature soundness for receipts.
// ============================================================================
//! ## Overview
//! Validates that receipt identity equals the digest of its stored bytes and
//! that flipping any part of the body or signature fails verification.

use relia_core::ContextId;
use relia_core::DecisionId;
use relia_core::DecisionPolicy;
use relia_core::IdemKey;
use relia_core::KeyId;
use relia_core::LocalSigner;
use relia_core::MakeReceiptInput;
use relia_core::OutcomeStatus;
use relia_core::ReceiptActor;
use relia_core::ReceiptError;
use relia_core::ReceiptOutcome;
use relia_core::ReceiptRequest;
use relia_core::StoredReceipt;
use relia_core::VerifyError;
use relia_core::digest_with_prefix;
use relia_core::make_receipt;
use relia_core::verify_receipt;

fn sample_receipt(signer: &LocalSigner) -> StoredReceipt {
    make_receipt(
        MakeReceiptInput {
            created_at: "2025-12-20T16:34:14Z".to_string(),
            idem_key: IdemKey::new("sha256:idem"),
            supersedes_receipt_id: None,
            context_id: ContextId::new("sha256:ctx"),
            decision_id: DecisionId::new("sha256:dec"),
            actor: ReceiptActor {
                kind: "workload".to_string(),
                subject: "repo:org/repo:ref:refs/heads/main".to_string(),
                issuer: "relia-dev".to_string(),
                repo: "org/repo".to_string(),
                workflow: "terraform-prod".to_string(),
                run_id: "123456".to_string(),
                sha: "abcdef123".to_string(),
            },
            request: ReceiptRequest {
                request_id: "req-1".to_string(),
                action: "terraform.apply".to_string(),
                resource: "res".to_string(),
                env: "dev".to_string(),
                intent: None,
            },
            policy: DecisionPolicy {
                policy_id: "relia-default".to_string(),
                policy_version: "2025-12-20".to_string(),
                policy_hash: "sha256:policy".to_string(),
            },
            approval: None,
            credential_grant: None,
            outcome: ReceiptOutcome::status_only(OutcomeStatus::Denied),
        },
        signer,
    )
    .unwrap()
}

// ============================================================================
// SECTION: Identity
// ============================================================================

/// Tests that receipt id and body digest both equal the digest of the bytes.
#[test]
fn test_receipt_identity_equality() {
    let signer = LocalSigner::from_seed(KeyId::new("k1"), &[0x01; 32]);
    let receipt = sample_receipt(&signer);

    let recomputed = digest_with_prefix(&receipt.body_json);
    assert_eq!(receipt.receipt_id.as_str(), recomputed);
    assert_eq!(receipt.body_digest, recomputed);
}

/// Tests that identical inputs produce identical receipts.
#[test]
fn test_receipt_is_deterministic() {
    let signer = LocalSigner::from_seed(KeyId::new("k1"), &[0x01; 32]);
    let first = sample_receipt(&signer);
    let second = sample_receipt(&signer);
    assert_eq!(first.receipt_id, second.receipt_id);
    assert_eq!(first.body_json, second.body_json);
    assert_eq!(first.sig, second.sig);
}

/// Tests that missing identity fields are rejected.
#[test]
fn test_receipt_requires_identity_chain() {
    let signer = LocalSigner::from_seed(KeyId::new("k1"), &[0x01; 32]);
    let mut input = MakeReceiptInput {
        created_at: "2025-12-20T16:34:14Z".to_string(),
        idem_key: IdemKey::new(""),
        supersedes_receipt_id: None,
        context_id: ContextId::new("sha256:ctx"),
        decision_id: DecisionId::new("sha256:dec"),
        actor: ReceiptActor::default(),
        request: ReceiptRequest::default(),
        policy: DecisionPolicy {
            policy_hash: "sha256:policy".to_string(),
            ..DecisionPolicy::default()
        },
        approval: None,
        credential_grant: None,
        outcome: ReceiptOutcome::status_only(OutcomeStatus::Denied),
    };
    assert!(matches!(
        make_receipt(input.clone(), &signer),
        Err(ReceiptError::MissingField("idem_key"))
    ));

    input.idem_key = IdemKey::new("sha256:idem");
    input.policy.policy_hash = String::new();
    assert!(matches!(
        make_receipt(input, &signer),
        Err(ReceiptError::MissingField("policy_hash"))
    ));
}

// ============================================================================
// SECTION: Signature Soundness
// ============================================================================

/// Tests that an untampered receipt verifies.
#[test]
fn test_verify_accepts_untampered_receipt() {
    let signer = LocalSigner::from_seed(KeyId::new("k1"), &[0x01; 32]);
    let receipt = sample_receipt(&signer);
    verify_receipt(&receipt, &signer.public_key()).unwrap();
}

/// Tests that flipping any body byte is a digest mismatch.
#[test]
fn test_verify_rejects_body_tampering() {
    let signer = LocalSigner::from_seed(KeyId::new("k1"), &[0x01; 32]);
    let baseline = sample_receipt(&signer);

    for index in 0..baseline.body_json.len() {
        let mut tampered = baseline.clone();
        tampered.body_json[index] ^= 0x01;
        assert_eq!(
            verify_receipt(&tampered, &signer.public_key()),
            Err(VerifyError::DigestMismatch),
            "byte {index} flip must fail",
        );
    }
}

/// Tests that flipping a signature bit fails as a signature error.
#[test]
fn test_verify_rejects_signature_tampering() {
    let signer = LocalSigner::from_seed(KeyId::new("k1"), &[0x01; 32]);
    let mut receipt = sample_receipt(&signer);
    receipt.sig[0] ^= 0x01;
    assert_eq!(
        verify_receipt(&receipt, &signer.public_key()),
        Err(VerifyError::SignatureInvalid)
    );
}

/// Tests that the wrong public key fails as a signature error.
#[test]
fn test_verify_rejects_wrong_key() {
    let signer = LocalSigner::from_seed(KeyId::new("k1"), &[0x01; 32]);
    let other = LocalSigner::from_seed(KeyId::new("k2"), &[0x02; 32]);
    let receipt = sample_receipt(&signer);
    assert_eq!(
        verify_receipt(&receipt, &other.public_key()),
        Err(VerifyError::SignatureInvalid)
    );
}
