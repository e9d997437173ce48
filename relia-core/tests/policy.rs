// relia-core/tests/policy.rs
// ============================================================================
// Module: Policy Engine Tests
// Description: First-match-wins evaluation semantics.
// ============================================================================
//! ## Overview
//! Validates defaults, wildcard matching, rule ordering, explicit deny
//! clearing, and post-rule verdict normalization.

use relia_core::LoadedPolicy;
use relia_core::PolicyInput;
use relia_core::Verdict;
use relia_core::core::policy::evaluate;

const POLICY: &str = r#"
policy_id: relia-default
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
      ttl_seconds: 600
      aws_role_arn: arn:aws:iam::123456789012:role/terraform-dev
      risk: low
  - id: terraform-prod
    match:
      action: terraform.apply
      env: prod
    effect:
      require_approval: true
      aws_role_arn: arn:aws:iam::123456789012:role/terraform-prod
      risk: high
      reason: production applies need a human approver
  - id: catch-all-prod
    match:
      env: prod
    effect:
      deny: true
"#;

fn input(action: &str, resource: &str, env: &str) -> PolicyInput {
    PolicyInput {
        action: action.to_string(),
        resource: resource.to_string(),
        env: env.to_string(),
    }
}

fn loaded() -> LoadedPolicy {
    LoadedPolicy::from_bytes(POLICY.as_bytes()).unwrap()
}

// ============================================================================
// SECTION: Matching
// ============================================================================

/// Tests that the first matching rule wins and sets its effect fields.
#[test]
fn test_first_match_wins() {
    let loaded = loaded();
    let decision = evaluate(
        &loaded.policy,
        &loaded.hash,
        &input("terraform.apply", "res", "prod"),
    );
    assert_eq!(decision.verdict, Verdict::RequireApproval);
    assert_eq!(decision.matched_rule_id.as_deref(), Some("terraform-prod"));
    assert_eq!(
        decision.reason_codes,
        vec!["POLICY_MATCH:terraform-prod".to_string()]
    );
    assert_eq!(
        decision.aws_role_arn.as_deref(),
        Some("arn:aws:iam::123456789012:role/terraform-prod")
    );
    assert_eq!(decision.risk.as_deref(), Some("high"));
    // The later catch-all deny never runs once a rule matched.
}

/// Tests that empty match fields act as wildcards.
#[test]
fn test_wildcard_match_fields() {
    let loaded = loaded();
    let decision = evaluate(
        &loaded.policy,
        &loaded.hash,
        &input("deploy.service", "anything", "prod"),
    );
    assert_eq!(decision.matched_rule_id.as_deref(), Some("catch-all-prod"));
    assert_eq!(decision.verdict, Verdict::Deny);
}

/// Tests that unmatched inputs fall back to defaults.
#[test]
fn test_defaults_apply_without_match() {
    let loaded = loaded();
    let decision = evaluate(
        &loaded.policy,
        &loaded.hash,
        &input("deploy.service", "res", "staging"),
    );
    assert_eq!(decision.verdict, Verdict::Allow);
    assert!(decision.matched_rule_id.is_none());
    assert!(decision.reason_codes.is_empty());
    assert_eq!(decision.ttl_seconds, 900);
}

/// Tests that a rule TTL overrides the default.
#[test]
fn test_rule_ttl_overrides_default() {
    let loaded = loaded();
    let decision = evaluate(
        &loaded.policy,
        &loaded.hash,
        &input("terraform.apply", "res", "dev"),
    );
    assert_eq!(decision.verdict, Verdict::Allow);
    assert_eq!(decision.ttl_seconds, 600);
}

// ============================================================================
// SECTION: Deny Semantics
// ============================================================================

/// Tests that a default deny stands absent a clearing rule.
#[test]
fn test_default_deny() {
    let raw = "policy_id: locked\ndefaults:\n  deny: true\nrules: []\n";
    let loaded = LoadedPolicy::from_bytes(raw.as_bytes()).unwrap();
    let decision = evaluate(&loaded.policy, &loaded.hash, &input("x", "y", "z"));
    assert_eq!(decision.verdict, Verdict::Deny);
}

/// Tests that an explicit `deny: false` clears a default deny.
#[test]
fn test_explicit_deny_false_clears_default() {
    let raw = r#"
policy_id: locked
defaults:
  deny: true
rules:
  - id: escape-hatch
    match:
      env: dev
    effect:
      deny: false
"#;
    let loaded = LoadedPolicy::from_bytes(raw.as_bytes()).unwrap();
    let decision = evaluate(&loaded.policy, &loaded.hash, &input("x", "y", "dev"));
    assert_eq!(decision.verdict, Verdict::Allow);
    let still_denied = evaluate(&loaded.policy, &loaded.hash, &input("x", "y", "prod"));
    assert_eq!(still_denied.verdict, Verdict::Deny);
}

/// Tests that deny beats require_approval in normalization.
#[test]
fn test_deny_beats_require_approval() {
    let raw = r#"
policy_id: strict
defaults:
  require_approval: true
rules:
  - id: hard-no
    match:
      env: prod
    effect:
      deny: true
      require_approval: true
"#;
    let loaded = LoadedPolicy::from_bytes(raw.as_bytes()).unwrap();
    let decision = evaluate(&loaded.policy, &loaded.hash, &input("x", "y", "prod"));
    assert_eq!(decision.verdict, Verdict::Deny);
}

// ============================================================================
// SECTION: Hash and Purity
// ============================================================================

/// Tests that the hash covers the raw bytes, not the parsed form.
#[test]
fn test_policy_hash_is_over_raw_bytes() {
    let with_comment = format!("# comment\n{POLICY}");
    let a = LoadedPolicy::from_bytes(POLICY.as_bytes()).unwrap();
    let b = LoadedPolicy::from_bytes(with_comment.as_bytes()).unwrap();
    assert_eq!(a.policy, b.policy);
    assert_ne!(a.hash, b.hash);
}

/// Tests that evaluation is a pure function of its inputs.
#[test]
fn test_evaluate_is_pure() {
    let loaded = loaded();
    let probe = input("terraform.apply", "res", "prod");
    let first = evaluate(&loaded.policy, &loaded.hash, &probe);
    let second = evaluate(&loaded.policy, &loaded.hash, &probe);
    assert_eq!(first, second);
    assert_eq!(first.policy_hash, loaded.hash);
}
