// relia-core/src/runtime/state.rs
// ============================================================================
// Module: Relia Idempotency State Machine
// Description: Plan table mapping observed state to the next authorize step.
// Purpose: Keep authorize outcomes exactly-once under retries.
// Dependencies: serde_json, crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Every authorize request is named by an idempotency key derived from the
//! caller's attested claims plus the request fields. The plan table below is
//! a total function over the observed `(idempotency, approval)` state; the
//! service computes the plan first and then commits the matching transition
//! in one ledger transaction, so concurrent retries converge on one outcome.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::canonical::CanonError;
use crate::core::canonical::canonical_bytes;
use crate::core::canonical::digest_with_prefix;
use crate::core::identifiers::IdemKey;
use crate::core::policy::Verdict;
use crate::interfaces::ApprovalStatus;

// ============================================================================
// SECTION: Statuses and Actions
// ============================================================================

/// Lifecycle of an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdemStatus {
    /// Parked behind a pending human approval.
    PendingApproval,
    /// Approval granted; issuance not yet started.
    ApprovedReady,
    /// Credential issuance in flight.
    Issuing,
    /// Terminal: credentials issued.
    Allowed,
    /// Terminal: denied.
    Denied,
    /// Terminal: errored.
    Errored,
}

impl IdemStatus {
    /// Returns the persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::ApprovedReady => "approved_ready",
            Self::Issuing => "issuing",
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::Errored => "errored",
        }
    }

    /// Parses the persisted string form; unknown strings return `None`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "pending_approval" => Some(Self::PendingApproval),
            "approved_ready" => Some(Self::ApprovedReady),
            "issuing" => Some(Self::Issuing),
            "allowed" => Some(Self::Allowed),
            "denied" => Some(Self::Denied),
            "errored" => Some(Self::Errored),
            _ => None,
        }
    }
}

/// Next step planned for an authorize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Return the cached terminal outcome.
    ReturnFinal,
    /// Return the pending-approval response.
    ReturnPending,
    /// Call the credential broker and finalize the chain.
    IssueCredentials,
    /// Evaluate policy for a first-time request.
    EvaluatePolicy,
    /// Return the cached denial.
    ReturnDenied,
    /// Return the cached error.
    ReturnErrored,
}

// ============================================================================
// SECTION: Plan Table
// ============================================================================

/// Maps observed idempotency and approval state to the next step.
#[must_use]
pub fn determine_next_action(
    idem: Option<IdemStatus>,
    approval: Option<ApprovalStatus>,
) -> NextAction {
    match idem {
        Some(IdemStatus::Allowed) => NextAction::ReturnFinal,
        Some(IdemStatus::Denied) => NextAction::ReturnDenied,
        Some(IdemStatus::Errored) | Some(IdemStatus::Issuing) => NextAction::ReturnErrored,
        Some(IdemStatus::ApprovedReady) => NextAction::IssueCredentials,
        Some(IdemStatus::PendingApproval) => match approval {
            None => NextAction::EvaluatePolicy,
            Some(ApprovalStatus::Pending) => NextAction::ReturnPending,
            Some(ApprovalStatus::Denied) => NextAction::ReturnDenied,
            Some(ApprovalStatus::Approved) => NextAction::IssueCredentials,
        },
        None => NextAction::EvaluatePolicy,
    }
}

/// Maps a policy verdict to the committed status and follow-up action.
#[must_use]
pub const fn transition_from_verdict(verdict: Verdict) -> (IdemStatus, NextAction) {
    match verdict {
        Verdict::Deny => (IdemStatus::Denied, NextAction::ReturnDenied),
        Verdict::RequireApproval => (IdemStatus::PendingApproval, NextAction::ReturnPending),
        Verdict::Allow => (IdemStatus::Issuing, NextAction::IssueCredentials),
    }
}

/// Planned outcome of one authorize entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizePlan {
    /// Next step to run.
    pub next_action: NextAction,
    /// Idempotency status to commit alongside it.
    pub idem_status: IdemStatus,
}

/// Errors raised while planning.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// Evaluation was required but no verdict was supplied.
    #[error("missing decision verdict")]
    MissingVerdict,
}

/// Plans the next action and the idempotency status to commit with it.
///
/// `verdict` must be supplied when the observed state requires evaluation.
///
/// # Errors
///
/// Returns [`PlanError::MissingVerdict`] when evaluation is required without
/// a verdict.
pub fn plan_authorize(
    idem: Option<IdemStatus>,
    approval: Option<ApprovalStatus>,
    verdict: Option<Verdict>,
) -> Result<AuthorizePlan, PlanError> {
    match determine_next_action(idem, approval) {
        NextAction::EvaluatePolicy => {
            let verdict = verdict.ok_or(PlanError::MissingVerdict)?;
            let (idem_status, next_action) = transition_from_verdict(verdict);
            Ok(AuthorizePlan {
                next_action,
                idem_status,
            })
        }
        NextAction::ReturnFinal => Ok(AuthorizePlan {
            next_action: NextAction::ReturnFinal,
            idem_status: IdemStatus::Allowed,
        }),
        NextAction::ReturnDenied => Ok(AuthorizePlan {
            next_action: NextAction::ReturnDenied,
            idem_status: IdemStatus::Denied,
        }),
        NextAction::ReturnErrored => Ok(AuthorizePlan {
            next_action: NextAction::ReturnErrored,
            idem_status: IdemStatus::Errored,
        }),
        NextAction::IssueCredentials => Ok(AuthorizePlan {
            next_action: NextAction::IssueCredentials,
            idem_status: IdemStatus::Issuing,
        }),
        NextAction::ReturnPending => Ok(AuthorizePlan {
            next_action: NextAction::ReturnPending,
            idem_status: IdemStatus::PendingApproval,
        }),
    }
}

// ============================================================================
// SECTION: Idempotency Key Derivation
// ============================================================================

/// Fields naming one logical authorize operation.
#[derive(Debug, Clone, Copy)]
pub struct IdemKeyInput<'a> {
    /// Attested subject.
    pub subject: &'a str,
    /// Repository.
    pub repo: &'a str,
    /// Workflow name.
    pub workflow: &'a str,
    /// Workflow run identifier.
    pub run_id: &'a str,
    /// Commit SHA.
    pub sha: &'a str,
    /// Requested action.
    pub action: &'a str,
    /// Target resource.
    pub resource: &'a str,
    /// Target environment.
    pub env: &'a str,
    /// Caller-chosen request identifier.
    pub request_id: &'a str,
    /// Structured intent, when provided.
    pub intent: Option<&'a Value>,
}

/// Derives the idempotency key as a canonical digest over the naming fields.
///
/// The key is stable across retries of the same logical request and changes
/// whenever any naming field changes.
///
/// # Errors
///
/// Returns [`CanonError`] when the intent value cannot be canonicalized.
pub fn compute_idem_key(input: &IdemKeyInput<'_>) -> Result<IdemKey, CanonError> {
    let view = json!({
        "subject": input.subject,
        "repo": input.repo,
        "workflow": input.workflow,
        "run_id": input.run_id,
        "sha": input.sha,
        "action": input.action,
        "resource": input.resource,
        "env": input.env,
        "request_id": input.request_id,
        "intent": input.intent,
    });
    let canonical = canonical_bytes(&view)?;
    Ok(IdemKey::new(digest_with_prefix(&canonical)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_table_is_total_over_known_states() {
        let idem_states = [
            None,
            Some(IdemStatus::PendingApproval),
            Some(IdemStatus::ApprovedReady),
            Some(IdemStatus::Issuing),
            Some(IdemStatus::Allowed),
            Some(IdemStatus::Denied),
            Some(IdemStatus::Errored),
        ];
        let approval_states = [
            None,
            Some(ApprovalStatus::Pending),
            Some(ApprovalStatus::Approved),
            Some(ApprovalStatus::Denied),
        ];
        for idem in idem_states {
            for approval in approval_states {
                let action = determine_next_action(idem, approval);
                if action != NextAction::EvaluatePolicy {
                    plan_authorize(idem, approval, None).unwrap();
                }
            }
        }
    }
}
