// relia-core/src/core/policy.rs
// ============================================================================
// Module: Relia Policy Engine
// Description: YAML policy model and first-match-wins evaluation.
// Purpose: Turn (policy, input) into a deterministic decision.
// Dependencies: serde, serde_yaml, crate::core::canonical
// ============================================================================

//! ## Overview
//! Policies are ordered rule lists over `(action, resource, env)` with
//! defaults. Evaluation is a pure function: the first matching rule applies
//! its effect and evaluation stops; rule order is the policy. The policy
//! hash is computed over the raw YAML bytes, not a re-serialized form, so a
//! snapshot in the ledger reproduces the hash exactly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::canonical::digest_with_prefix;

// ============================================================================
// SECTION: Policy Model
// ============================================================================

/// Policy document parsed from YAML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy identifier.
    #[serde(default)]
    pub policy_id: String,
    /// Policy version label.
    #[serde(default)]
    pub policy_version: String,
    /// Defaults applied before any rule matches.
    #[serde(default)]
    pub defaults: PolicyDefaults,
    /// Ordered rule list; order is the policy.
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

/// Defaults seeding every evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefaults {
    /// Default credential TTL in seconds.
    #[serde(default)]
    pub ttl_seconds: i64,
    /// Whether approval is required absent a matching rule.
    #[serde(default)]
    pub require_approval: bool,
    /// Whether requests are denied absent a matching rule.
    #[serde(default)]
    pub deny: bool,
}

/// One ordered policy rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule identifier, surfaced in reason codes.
    #[serde(default)]
    pub id: String,
    /// Match clause; empty fields are wildcards.
    #[serde(default)]
    pub r#match: RuleMatch,
    /// Effect applied when the rule matches.
    #[serde(default)]
    pub effect: RuleEffect,
}

/// Match clause over the evaluation input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatch {
    /// Action to match; empty matches any.
    #[serde(default)]
    pub action: String,
    /// Resource to match; empty matches any.
    #[serde(default)]
    pub resource: String,
    /// Environment to match; empty matches any.
    #[serde(default)]
    pub env: String,
}

/// Effect fields set by a matching rule; unset fields keep prior values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEffect {
    /// Overrides the approval requirement.
    #[serde(default)]
    pub require_approval: Option<bool>,
    /// Sets or clears a deny verdict. Explicit `false` clears a default deny.
    #[serde(default)]
    pub deny: Option<bool>,
    /// Overrides the credential TTL.
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
    /// Binds the credential role.
    #[serde(default)]
    pub aws_role_arn: Option<String>,
    /// Risk label.
    #[serde(default)]
    pub risk: Option<String>,
    /// Human-readable reason.
    #[serde(default)]
    pub reason: Option<String>,
}

// ============================================================================
// SECTION: Loading
// ============================================================================

/// Errors raised while loading a policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The YAML failed to parse.
    #[error("policy parse failed: {0}")]
    Parse(String),
}

/// A parsed policy together with its raw bytes and hash.
#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    /// Parsed policy document.
    pub policy: Policy,
    /// Digest of the raw YAML bytes, `sha256:` prefixed.
    pub hash: String,
    /// Raw YAML bytes as hashed.
    pub bytes: Vec<u8>,
}

impl LoadedPolicy {
    /// Parses policy YAML bytes and hashes the raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Parse`] when the YAML is malformed.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PolicyError> {
        let policy: Policy =
            serde_yaml::from_slice(data).map_err(|err| PolicyError::Parse(err.to_string()))?;
        Ok(Self {
            policy,
            hash: digest_with_prefix(data),
            bytes: data.to_vec(),
        })
    }
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Verdict of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Proceed to credential issuance.
    Allow,
    /// Refuse the request.
    Deny,
    /// Park the request behind a human approval.
    RequireApproval,
}

impl Verdict {
    /// Returns the stable string form used in records and responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::RequireApproval => "require_approval",
        }
    }
}

/// Input facts for one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyInput {
    /// Requested action.
    pub action: String,
    /// Target resource.
    pub resource: String,
    /// Target environment.
    pub env: String,
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    /// Final verdict after normalization.
    pub verdict: Verdict,
    /// Whether a human approval is required.
    pub require_approval: bool,
    /// Credential TTL in seconds.
    pub ttl_seconds: i64,
    /// Bound role, when a rule set one.
    pub aws_role_arn: Option<String>,
    /// Risk label, when a rule set one.
    pub risk: Option<String>,
    /// Human-readable reason, when a rule set one.
    pub reason: Option<String>,
    /// Identifier of the matching rule, when any matched.
    pub matched_rule_id: Option<String>,
    /// Reason codes appended during evaluation.
    pub reason_codes: Vec<String>,
    /// Policy identifier.
    pub policy_id: String,
    /// Policy version label.
    pub policy_version: String,
    /// Digest of the raw policy bytes.
    pub policy_hash: String,
}

/// Evaluates a policy against the input; first matching rule wins.
#[must_use]
pub fn evaluate(policy: &Policy, policy_hash: &str, input: &PolicyInput) -> PolicyDecision {
    let mut decision = PolicyDecision {
        verdict: if policy.defaults.deny {
            Verdict::Deny
        } else {
            Verdict::Allow
        },
        require_approval: policy.defaults.require_approval,
        ttl_seconds: policy.defaults.ttl_seconds,
        aws_role_arn: None,
        risk: None,
        reason: None,
        matched_rule_id: None,
        reason_codes: Vec::new(),
        policy_id: policy.policy_id.clone(),
        policy_version: policy.policy_version.clone(),
        policy_hash: policy_hash.to_string(),
    };

    for rule in &policy.rules {
        if !rule_matches(&rule.r#match, input) {
            continue;
        }

        decision.matched_rule_id = Some(rule.id.clone());
        decision
            .reason_codes
            .push(format!("POLICY_MATCH:{}", rule.id));

        if let Some(require_approval) = rule.effect.require_approval {
            decision.require_approval = require_approval;
        }
        if let Some(deny) = rule.effect.deny {
            if deny {
                decision.verdict = Verdict::Deny;
            } else if decision.verdict == Verdict::Deny {
                decision.verdict = Verdict::Allow;
            }
        }
        if let Some(ttl_seconds) = rule.effect.ttl_seconds {
            decision.ttl_seconds = ttl_seconds;
        }
        if let Some(role_arn) = &rule.effect.aws_role_arn {
            decision.aws_role_arn = Some(role_arn.clone());
        }
        if let Some(risk) = &rule.effect.risk {
            decision.risk = Some(risk.clone());
        }
        if let Some(reason) = &rule.effect.reason {
            decision.reason = Some(reason.clone());
        }

        normalize_verdict(&mut decision);
        return decision;
    }

    normalize_verdict(&mut decision);
    decision
}

fn rule_matches(clause: &RuleMatch, input: &PolicyInput) -> bool {
    if !clause.action.is_empty() && clause.action != input.action {
        return false;
    }
    if !clause.resource.is_empty() && clause.resource != input.resource {
        return false;
    }
    if !clause.env.is_empty() && clause.env != input.env {
        return false;
    }
    true
}

fn normalize_verdict(decision: &mut PolicyDecision) {
    if decision.verdict != Verdict::Deny {
        decision.verdict = if decision.require_approval {
            Verdict::RequireApproval
        } else {
            Verdict::Allow
        };
    }
}
