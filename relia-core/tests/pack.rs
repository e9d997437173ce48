// relia-core/tests/pack.rs
// ============================================================================
// Module: Pack Builder Tests
// Description: Pack entry layout, digest index, and byte round-trips.
// ============================================================================
//! ## Overview
//! Validates that packs contain exactly the specified entries, that every
//! digest line matches its entry bytes, and that unzipping returns the exact
//! stored body bytes.

use std::collections::BTreeSet;
use std::io::Read;

use relia_core::ApprovalId;
use relia_core::ApprovalSummary;
use relia_core::ContextEvidence;
use relia_core::ContextInputs;
use relia_core::ContextSource;
use relia_core::DecisionPolicy;
use relia_core::IdemKey;
use relia_core::KeyId;
use relia_core::LocalSigner;
use relia_core::MakeReceiptInput;
use relia_core::OutcomeStatus;
use relia_core::PackError;
use relia_core::PackInput;
use relia_core::PackManifest;
use relia_core::ReceiptActor;
use relia_core::ReceiptId;
use relia_core::ReceiptOutcome;
use relia_core::ReceiptRequest;
use relia_core::build_context;
use relia_core::build_decision;
use relia_core::build_files;
use relia_core::build_summary;
use relia_core::build_zip;
use relia_core::digest_hex;
use relia_core::make_receipt;

const CREATED_AT: &str = "2025-12-20T16:34:14Z";

fn sample_input() -> PackInput {
    let signer = LocalSigner::from_seed(KeyId::new("k1"), &[0x01; 32]);

    let (context, context_bytes) = build_context(
        ContextSource {
            kind: "github_actions".to_string(),
            repo: "org/repo".to_string(),
            workflow: "wf".to_string(),
            run_id: "1".to_string(),
            actor: "dev".to_string(),
            git_ref: Some("refs/heads/main".to_string()),
            sha: "abc".to_string(),
        },
        ContextInputs {
            action: "terraform.apply".to_string(),
            resource: "res".to_string(),
            env: "prod".to_string(),
            intent: None,
        },
        ContextEvidence {
            plan_digest: Some("sha256:plan".to_string()),
            diff_url: None,
        },
        CREATED_AT,
    )
    .unwrap();

    let policy_meta = DecisionPolicy {
        policy_id: "relia-default".to_string(),
        policy_version: "2025-12-20".to_string(),
        policy_hash: "sha256:policy".to_string(),
    };
    let (decision, decision_bytes) = build_decision(
        &context.context_id,
        policy_meta.clone(),
        "allow",
        Vec::new(),
        false,
        Some("high".to_string()),
        CREATED_AT,
    )
    .unwrap();

    let receipt = make_receipt(
        MakeReceiptInput {
            created_at: CREATED_AT.to_string(),
            idem_key: IdemKey::new("sha256:idem"),
            supersedes_receipt_id: None,
            context_id: context.context_id.clone(),
            decision_id: decision.decision_id.clone(),
            actor: ReceiptActor {
                kind: "workload".to_string(),
                subject: "dev".to_string(),
                ..ReceiptActor::default()
            },
            request: ReceiptRequest {
                request_id: "req-1".to_string(),
                action: "terraform.apply".to_string(),
                resource: "res".to_string(),
                env: "prod".to_string(),
                intent: None,
            },
            policy: policy_meta,
            approval: None,
            credential_grant: None,
            outcome: ReceiptOutcome::status_only(OutcomeStatus::Denied),
        },
        &signer,
    )
    .unwrap();

    PackInput {
        receipt,
        context_body: context_bytes,
        decision_body: decision_bytes,
        policy_yaml: b"policy_id: relia-default\n".to_vec(),
        approvals: vec![ApprovalSummary {
            approval_id: ApprovalId::new("approval-1"),
            status: "approved".to_string(),
            receipt_id: ReceiptId::new("sha256:follow-up"),
        }],
        valid: true,
        created_at: CREATED_AT.to_string(),
    }
}

// ============================================================================
// SECTION: Entries
// ============================================================================

/// Tests that the zip contains exactly the specified entries.
#[test]
fn test_zip_contains_exact_entries() {
    let zip_bytes = build_zip(&sample_input(), "http://localhost:8080").unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_bytes)).unwrap();

    let expected: BTreeSet<&str> = [
        "receipt.json",
        "context.json",
        "decision.json",
        "policy.yaml",
        "approvals.json",
        "manifest.json",
        "sha256sums.txt",
    ]
    .into_iter()
    .collect();
    let actual: BTreeSet<String> = (0..archive.len())
        .map(|index| archive.by_index(index).unwrap().name().to_string())
        .collect();
    assert_eq!(
        actual,
        expected.into_iter().map(str::to_string).collect::<BTreeSet<_>>()
    );
}

/// Tests that unzipped bodies are the exact stored bytes.
#[test]
fn test_zip_round_trips_stored_bytes() {
    let input = sample_input();
    let zip_bytes = build_zip(&input, "").unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_bytes)).unwrap();

    let mut read_entry = |name: &str| -> Vec<u8> {
        let mut entry = archive.by_name(name).unwrap();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).unwrap();
        bytes
    };

    assert_eq!(read_entry("receipt.json"), input.receipt.body_json);
    assert_eq!(read_entry("context.json"), input.context_body);
    assert_eq!(read_entry("decision.json"), input.decision_body);
    assert_eq!(read_entry("policy.yaml"), input.policy_yaml);
}

/// Tests that every digest line matches its entry bytes.
#[test]
fn test_sha256sums_match_entries() {
    let files = build_files(&sample_input(), "http://localhost:8080").unwrap();
    let sums = String::from_utf8(files.get("sha256sums.txt").unwrap().clone()).unwrap();

    let mut listed = 0;
    for line in sums.lines() {
        let (digest, name) = line.split_once("  ").unwrap();
        let bytes = files
            .get(name)
            .unwrap_or_else(|| panic!("unknown entry {name}"));
        assert_eq!(digest, digest_hex(bytes), "digest mismatch for {name}");
        listed += 1;
    }
    assert_eq!(listed, files.len() - 1);
    assert!(!sums.contains("sha256sums.txt"));
}

/// Tests manifest links and grade wiring.
#[test]
fn test_manifest_links_and_grade() {
    let input = sample_input();
    let files = build_files(&input, "http://localhost:8080").unwrap();
    let manifest: PackManifest =
        serde_json::from_slice(files.get("manifest.json").unwrap()).unwrap();
    assert_eq!(manifest.schema, "relia.pack.v0.1");
    assert_eq!(manifest.receipt_id, input.receipt.receipt_id);
    assert_eq!(
        manifest.verify_url.as_deref(),
        Some(
            format!(
                "http://localhost:8080/v1/verify/{}",
                input.receipt.receipt_id
            )
            .as_str()
        )
    );
    assert_eq!(manifest.created_at, CREATED_AT);
    assert!(!manifest.grade.is_empty());

    let summary = build_summary(&input, "").unwrap();
    assert!(summary.verify_url.is_none());
    assert!(summary.pack_url.is_none());
    assert_eq!(summary.grade, manifest.grade);
}

// ============================================================================
// SECTION: Failure Modes
// ============================================================================

/// Tests that missing policy bytes are rejected.
#[test]
fn test_missing_policy_rejected() {
    let mut input = sample_input();
    input.policy_yaml.clear();
    assert!(matches!(
        build_files(&input, ""),
        Err(PackError::MissingPolicy)
    ));
}

/// Tests that malformed stored bodies are rejected.
#[test]
fn test_invalid_stored_artifact_rejected() {
    let mut input = sample_input();
    input.context_body = b"not json".to_vec();
    assert!(matches!(
        build_files(&input, ""),
        Err(PackError::InvalidArtifact { name: "context.json", .. })
    ));
}
