// relia-core/src/core/grade.rs
// ============================================================================
// Module: Relia Receipt Grading
// Description: Completeness grading of a receipt and its supporting records.
// Purpose: Summarize how auditable a receipt is in one letter.
// Dependencies: serde, serde_json, crate::core::{receipt, records}
// ============================================================================

//! ## Overview
//! The grade is a heuristic over what a receipt carries: `F` when the
//! signature is invalid or the policy hash is missing, `D` when a required
//! approval was never granted, `C` when both evidence links are absent, `B`
//! when one of plan digest, diff URL, role ARN, or TTL is missing, `A`
//! otherwise. Reasons list every missing element.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::core::receipt::ReceiptApproval;
use crate::core::receipt::ReceiptCredentialGrant;
use crate::core::receipt::StoredReceipt;
use crate::core::records::ContextRecord;
use crate::core::records::DecisionRecord;

// ============================================================================
// SECTION: Input / Result
// ============================================================================

/// Inputs for grading one receipt.
#[derive(Debug, Clone)]
pub struct GradeInput<'a> {
    /// Whether the receipt signature verified.
    pub valid: bool,
    /// The stored receipt.
    pub receipt: &'a StoredReceipt,
    /// Parsed context record, when available.
    pub context: Option<&'a ContextRecord>,
    /// Parsed decision record, when available.
    pub decision: Option<&'a DecisionRecord>,
}

/// Grade with its supporting reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeResult {
    /// Letter grade `A`..`F`.
    pub grade: String,
    /// Sorted `missing_*` / `invalid_*` reason codes.
    pub reasons: Vec<String>,
}

/// Partial receipt body view; unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct ReceiptBodyView {
    #[serde(default)]
    policy: PolicyView,
    #[serde(default)]
    approval: Option<ReceiptApproval>,
    #[serde(default)]
    credential_grant: Option<ReceiptCredentialGrant>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyView {
    #[serde(default)]
    policy_hash: String,
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Grades a receipt against its supporting records.
#[must_use]
pub fn evaluate(input: &GradeInput<'_>) -> GradeResult {
    if !input.valid {
        return GradeResult {
            grade: "F".to_string(),
            reasons: vec!["invalid_signature".to_string()],
        };
    }

    let body: ReceiptBodyView =
        serde_json::from_slice(&input.receipt.body_json).unwrap_or_default();

    let mut missing = BTreeSet::new();

    if body.policy.policy_hash.is_empty() && input.receipt.policy_hash.is_empty() {
        missing.insert("policy_hash");
    }
    if let Some(decision) = input.decision {
        if decision.policy.policy_hash.is_empty() {
            missing.insert("decision_policy_hash");
        }
    }

    if let Some(context) = input.context {
        if is_blank(context.evidence.plan_digest.as_deref()) {
            missing.insert("plan_digest");
        }
        if is_blank(context.evidence.diff_url.as_deref()) {
            missing.insert("diff_url");
        }
    }

    match &body.credential_grant {
        Some(grant) if !grant.role_arn.trim().is_empty() => {}
        _ => {
            missing.insert("role_arn");
        }
    }
    match &body.credential_grant {
        Some(grant) if grant.ttl_seconds > 0 => {}
        _ => {
            missing.insert("ttl");
        }
    }

    let mut approval_required = input
        .decision
        .is_some_and(|decision| decision.requires_approval);
    let mut approval_approved = false;
    if let Some(approval) = &body.approval {
        if approval.required {
            approval_required = true;
        }
        if approval
            .status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("approved"))
        {
            approval_approved = true;
        }
    }
    if approval_required && !approval_approved {
        missing.insert("approval");
    }

    let grade = if missing.contains("policy_hash") || missing.contains("decision_policy_hash") {
        "F"
    } else if missing.contains("approval") {
        "D"
    } else if missing.contains("plan_digest") && missing.contains("diff_url") {
        "C"
    } else if missing.contains("plan_digest")
        || missing.contains("diff_url")
        || missing.contains("role_arn")
        || missing.contains("ttl")
    {
        "B"
    } else {
        "A"
    };

    GradeResult {
        grade: grade.to_string(),
        reasons: missing
            .into_iter()
            .map(|reason| format!("missing_{reason}"))
            .collect(),
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |text| text.trim().is_empty())
}
