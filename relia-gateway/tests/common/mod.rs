// relia-gateway/tests/common/mod.rs
// ============================================================================
// Module: Gateway Test Fixtures
// Description: Shared service construction for integration tests.
// ============================================================================
//! ## Overview
//! Builds an authorize service over the in-memory ledger with a seeded
//! signing key, the repository's default policy shape, and a Slack channel
//! so approval paths create outbox rows.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use relia_core::KeyId;
use relia_core::LocalSigner;
use relia_gateway::auth::ActorClaims;
use relia_gateway::service::AuthorizeRequest;
use relia_gateway::service::AuthorizeService;
use relia_gateway::service::AuthorizeServiceInput;

/// Timestamp used by deterministic fixtures.
pub const CREATED_AT: &str = "2025-12-20T16:34:14Z";

const POLICY: &str = r#"policy_id: relia-default
policy_version: "2025-12-20"
defaults:
  ttl_seconds: 900
  require_approval: false
  deny: false
rules:
  - id: terraform-dev
    match:
      action: terraform.apply
      env: dev
    effect:
      ttl_seconds: 900
      aws_role_arn: arn:aws:iam::123456789012:role/terraform-dev
      risk: low
  - id: terraform-prod
    match:
      action: terraform.apply
      env: prod
    effect:
      require_approval: true
      ttl_seconds: 900
      aws_role_arn: arn:aws:iam::123456789012:role/terraform-prod
      risk: high
      reason: production applies need a human approver
  - id: deny-unmatched-prod
    match:
      env: prod
    effect:
      deny: true
"#;

/// Writes the test policy into a temp dir and returns its path.
pub fn write_policy(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("relia.yaml");
    std::fs::write(&path, POLICY).expect("write policy");
    path
}

/// Builds a service over the in-memory ledger with a seeded signer.
pub fn test_service() -> (tempfile::TempDir, Arc<AuthorizeService>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let policy_path = write_policy(&dir);

    let signer = LocalSigner::from_seed(KeyId::new("test"), &[0x01; 32]);
    let public_key = signer.public_key();

    let service = AuthorizeService::new(AuthorizeServiceInput {
        policy_path,
        ledger: None,
        signer: Some(Arc::new(signer)),
        public_key: Some(public_key),
        broker: None,
        slack_channel: Some("C-approvals".to_string()),
        broker_region: None,
    })
    .expect("service");

    (dir, Arc::new(service))
}

/// Returns workload claims matching the dev fixtures.
pub fn claims() -> ActorClaims {
    ActorClaims {
        subject: "repo:org/repo:ref:refs/heads/main".to_string(),
        issuer: "relia-dev".to_string(),
        repo: "org/repo".to_string(),
        workflow: "terraform-prod".to_string(),
        run_id: "123456".to_string(),
        sha: "abcdef123".to_string(),
        token: "jwt".to_string(),
    }
}

/// Builds an authorize request for the provided coordinates.
pub fn request(action: &str, resource: &str, env: &str, request_id: &str) -> AuthorizeRequest {
    AuthorizeRequest {
        request_id: request_id.to_string(),
        action: action.to_string(),
        resource: resource.to_string(),
        env: env.to_string(),
        intent: None,
        evidence: relia_gateway::service::RequestEvidence::default(),
    }
}
