// relia-core/src/core/records.rs
// ============================================================================
// Module: Relia Context and Decision Records
// Description: Content-addressed context and decision records with builders.
// Purpose: Derive record identities from canonical signing views.
// Dependencies: serde, serde_json, crate::core::canonical
// ============================================================================

//! ## Overview
//! Context records capture the attested caller plus the requested operation;
//! decision records bind a policy verdict to one context. Both derive their
//! identifier from the digest of an explicit canonical signing view, so the
//! identifier is a pure function of the logical record. Optional fields that
//! are absent are omitted from the signing view entirely.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::canonical::CanonError;
use crate::core::canonical::canonical_bytes;
use crate::core::canonical::digest_with_prefix;
use crate::core::identifiers::ContextId;
use crate::core::identifiers::DecisionId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema identifier for context records.
pub const CONTEXT_SCHEMA: &str = "relia.context.v0.1";
/// Schema identifier for decision records.
pub const DECISION_SCHEMA: &str = "relia.decision.v0.1";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while building a record.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The signing view failed to canonicalize.
    #[error("record canonicalization failed: {0}")]
    Canon(#[from] CanonError),
}

// ============================================================================
// SECTION: Context Record
// ============================================================================

/// Attested origin of the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSource {
    /// Source kind, e.g. `github_actions`.
    pub kind: String,
    /// Repository the workload ran from.
    pub repo: String,
    /// Workflow name.
    pub workflow: String,
    /// Workflow run identifier.
    pub run_id: String,
    /// Acting subject.
    pub actor: String,
    /// Git ref, when attested.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    /// Commit SHA.
    pub sha: String,
}

/// Requested operation inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInputs {
    /// Requested action, e.g. `terraform.apply`.
    pub action: String,
    /// Target resource.
    pub resource: String,
    /// Target environment.
    pub env: String,
    /// Free-form structured intent supplied by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Value>,
}

/// Supporting evidence attached by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEvidence {
    /// Digest of the change plan, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_digest: Option<String>,
    /// Link to the reviewed diff, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_url: Option<String>,
}

/// Content-addressed context record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRecord {
    /// Record schema identifier.
    pub schema: String,
    /// Content-addressed identifier; absent inside stored body bytes.
    #[serde(default)]
    pub context_id: ContextId,
    /// Creation timestamp (RFC3339, UTC).
    pub created_at: String,
    /// Attested caller origin.
    pub source: ContextSource,
    /// Requested operation inputs.
    pub inputs: ContextInputs,
    /// Supporting evidence.
    #[serde(default)]
    pub evidence: ContextEvidence,
}

/// Builds a context record and derives its content-addressed identifier.
///
/// # Errors
///
/// Returns [`RecordError`] when the signing view fails to canonicalize.
pub fn build_context(
    source: ContextSource,
    inputs: ContextInputs,
    evidence: ContextEvidence,
    created_at: &str,
) -> Result<(ContextRecord, Vec<u8>), RecordError> {
    let view = json!({
        "schema": CONTEXT_SCHEMA,
        "created_at": created_at,
        "source": {
            "kind": &source.kind,
            "repo": &source.repo,
            "workflow": &source.workflow,
            "run_id": &source.run_id,
            "actor": &source.actor,
            "ref": &source.git_ref,
            "sha": &source.sha,
        },
        "inputs": {
            "action": &inputs.action,
            "resource": &inputs.resource,
            "env": &inputs.env,
            "intent": &inputs.intent,
        },
        "evidence": {
            "plan_digest": &evidence.plan_digest,
            "diff_url": &evidence.diff_url,
        },
    });

    let canonical = canonical_bytes(&view)?;
    let record = ContextRecord {
        schema: CONTEXT_SCHEMA.to_string(),
        context_id: ContextId::new(digest_with_prefix(&canonical)),
        created_at: created_at.to_string(),
        source,
        inputs,
        evidence,
    };
    Ok((record, canonical))
}

// ============================================================================
// SECTION: Decision Record
// ============================================================================

/// Policy metadata embedded in decisions and receipts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPolicy {
    /// Policy identifier.
    pub policy_id: String,
    /// Policy version label.
    pub policy_version: String,
    /// Digest of the raw policy bytes.
    pub policy_hash: String,
}

/// Content-addressed decision record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Record schema identifier.
    pub schema: String,
    /// Content-addressed identifier; absent inside stored body bytes.
    #[serde(default)]
    pub decision_id: DecisionId,
    /// Creation timestamp (RFC3339, UTC).
    pub created_at: String,
    /// Context the decision was made for.
    pub context_id: ContextId,
    /// Policy snapshot metadata.
    pub policy: DecisionPolicy,
    /// Verdict string: `allow`, `deny`, or `require_approval`.
    pub verdict: String,
    /// Reason codes appended during evaluation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reason_codes: Vec<String>,
    /// Whether the decision requires a human approval.
    pub requires_approval: bool,
    /// Risk label, when set by policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,
}

/// Builds a decision record and derives its content-addressed identifier.
///
/// # Errors
///
/// Returns [`RecordError`] when the signing view fails to canonicalize.
pub fn build_decision(
    context_id: &ContextId,
    policy: DecisionPolicy,
    verdict: &str,
    reason_codes: Vec<String>,
    requires_approval: bool,
    risk: Option<String>,
    created_at: &str,
) -> Result<(DecisionRecord, Vec<u8>), RecordError> {
    let view = json!({
        "schema": DECISION_SCHEMA,
        "created_at": created_at,
        "context_id": context_id,
        "policy": {
            "policy_id": &policy.policy_id,
            "policy_version": &policy.policy_version,
            "policy_hash": &policy.policy_hash,
        },
        "verdict": verdict,
        "reason_codes": &reason_codes,
        "requires_approval": requires_approval,
        "risk": &risk,
    });

    let canonical = canonical_bytes(&view)?;
    let record = DecisionRecord {
        schema: DECISION_SCHEMA.to_string(),
        decision_id: DecisionId::new(digest_with_prefix(&canonical)),
        created_at: created_at.to_string(),
        context_id: context_id.clone(),
        policy,
        verdict: verdict.to_string(),
        reason_codes,
        requires_approval,
        risk,
    };
    Ok((record, canonical))
}
