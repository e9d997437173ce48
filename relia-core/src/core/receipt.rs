// relia-core/src/core/receipt.rs
// ============================================================================
// Module: Relia Receipts
// Description: Signed, content-addressed receipts of authorize outcomes.
// Purpose: Canonicalize, digest, and sign receipt bodies.
// Dependencies: serde, serde_json, crate::core::{canonical, signing}
// ============================================================================

//! ## Overview
//! A receipt is the immutable record of one authorize outcome. Its body is
//! canonical JSON; the receipt identifier is the digest of those bytes and
//! the signature covers the 32-byte digest. Receipts form a per-operation
//! chain through `supersedes_receipt_id`; the chain ends at a receipt whose
//! outcome is terminal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::core::canonical::CanonError;
use crate::core::canonical::canonical_bytes;
use crate::core::canonical::digest_bytes;
use crate::core::canonical::digest_with_prefix;
use crate::core::identifiers::ApprovalId;
use crate::core::identifiers::ContextId;
use crate::core::identifiers::DecisionId;
use crate::core::identifiers::IdemKey;
use crate::core::identifiers::KeyId;
use crate::core::identifiers::ReceiptId;
use crate::core::records::DecisionPolicy;
use crate::core::signing::SignError;
use crate::core::signing::Signer;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema identifier for receipt records.
pub const RECEIPT_SCHEMA: &str = "relia.receipt.v0.1";

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Outcome of a single authorize step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Waiting on a human approval.
    ApprovalPending,
    /// Approval granted; issuance not yet attempted.
    ApprovalApproved,
    /// Approval denied.
    ApprovalDenied,
    /// Credential issuance in flight.
    IssuingCredentials,
    /// Credentials issued (terminal).
    IssuedCredentials,
    /// Request denied (terminal).
    Denied,
    /// Credential issuance failed (terminal).
    IssueFailed,
}

impl OutcomeStatus {
    /// Returns the stable string form persisted in the ledger.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApprovalPending => "approval_pending",
            Self::ApprovalApproved => "approval_approved",
            Self::ApprovalDenied => "approval_denied",
            Self::IssuingCredentials => "issuing_credentials",
            Self::IssuedCredentials => "issued_credentials",
            Self::Denied => "denied",
            Self::IssueFailed => "issue_failed",
        }
    }

    /// Returns true when the outcome ends the receipt chain.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(
            self,
            Self::IssuedCredentials | Self::Denied | Self::IssueFailed
        )
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "approval_pending" => Some(Self::ApprovalPending),
            "approval_approved" => Some(Self::ApprovalApproved),
            "approval_denied" => Some(Self::ApprovalDenied),
            "issuing_credentials" => Some(Self::IssuingCredentials),
            "issued_credentials" => Some(Self::IssuedCredentials),
            "denied" => Some(Self::Denied),
            "issue_failed" => Some(Self::IssueFailed),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Receipt Body Parts
// ============================================================================

/// Attested actor embedded in the receipt body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptActor {
    /// Actor kind, e.g. `workload`.
    pub kind: String,
    /// Attested subject.
    pub subject: String,
    /// Token issuer.
    pub issuer: String,
    /// Repository.
    pub repo: String,
    /// Workflow name.
    pub workflow: String,
    /// Workflow run identifier.
    pub run_id: String,
    /// Commit SHA.
    pub sha: String,
}

/// Request embedded in the receipt body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRequest {
    /// Caller-chosen request identifier.
    pub request_id: String,
    /// Requested action.
    pub action: String,
    /// Target resource.
    pub resource: String,
    /// Target environment.
    pub env: String,
    /// Structured intent, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<serde_json::Value>,
}

/// Policy metadata embedded in the receipt body.
pub type ReceiptPolicy = DecisionPolicy;

/// Approver identity recorded on finalized approvals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptApprover {
    /// Approver kind, e.g. `slack_user`.
    pub kind: String,
    /// Approver identifier within its system.
    pub id: String,
    /// Display name.
    pub display: String,
}

/// Approval state embedded in the receipt body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptApproval {
    /// Whether the decision required an approval.
    pub required: bool,
    /// Approval identifier, once allocated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<ApprovalId>,
    /// Approval status at receipt time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Approval timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
    /// Approver identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<ReceiptApprover>,
}

/// Credential grant embedded in the receipt body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptCredentialGrant {
    /// Credential provider, e.g. `aws_sts`.
    pub provider: String,
    /// Issuance method, e.g. `AssumeRoleWithWebIdentity`.
    pub method: String,
    /// Role bound by policy.
    pub role_arn: String,
    /// Issuing region.
    pub region: String,
    /// Credential lifetime in seconds.
    pub ttl_seconds: i64,
    /// Digest of the granted scope.
    pub scope_digest: String,
}

/// Outcome error embedded in the receipt body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeError {
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub msg: String,
}

/// Outcome embedded in the receipt body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptOutcome {
    /// Outcome status.
    pub status: OutcomeStatus,
    /// Issuance timestamp, when credentials were issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<String>,
    /// Credential expiry, when credentials were issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Terminal error, when the outcome failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl ReceiptOutcome {
    /// Builds an outcome carrying only a status.
    #[must_use]
    pub const fn status_only(status: OutcomeStatus) -> Self {
        Self {
            status,
            issued_at: None,
            expires_at: None,
            error: None,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while assembling a receipt.
#[derive(Debug, Error)]
pub enum ReceiptError {
    /// A required receipt field was missing.
    #[error("missing required receipt field: {0}")]
    MissingField(&'static str),
    /// The body failed to canonicalize.
    #[error("receipt canonicalization failed: {0}")]
    Canon(#[from] CanonError),
    /// Signing the body digest failed.
    #[error("receipt signing failed: {0}")]
    Sign(#[from] SignError),
}

// ============================================================================
// SECTION: Receipt Assembly
// ============================================================================

/// Inputs required to assemble and sign a receipt.
#[derive(Debug, Clone)]
pub struct MakeReceiptInput {
    /// Creation timestamp (RFC3339, UTC).
    pub created_at: String,
    /// Idempotency key of the logical operation.
    pub idem_key: IdemKey,
    /// Receipt superseded by this one, when finalizing a chain.
    pub supersedes_receipt_id: Option<ReceiptId>,
    /// Context record identifier.
    pub context_id: ContextId,
    /// Decision record identifier.
    pub decision_id: DecisionId,
    /// Attested actor.
    pub actor: ReceiptActor,
    /// Original request.
    pub request: ReceiptRequest,
    /// Policy snapshot metadata.
    pub policy: ReceiptPolicy,
    /// Approval state, when the decision involves one.
    pub approval: Option<ReceiptApproval>,
    /// Credential grant, when credentials were issued.
    pub credential_grant: Option<ReceiptCredentialGrant>,
    /// Outcome of this step.
    pub outcome: ReceiptOutcome,
}

/// Signed receipt alongside its ledger metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReceipt {
    /// Content-addressed identifier (equals `body_digest`).
    pub receipt_id: ReceiptId,
    /// Digest of `body_json` with the `sha256:` prefix.
    pub body_digest: String,
    /// Canonical body bytes.
    pub body_json: Vec<u8>,
    /// Signing key identifier.
    pub key_id: KeyId,
    /// Ed25519 signature over the 32-byte body digest.
    pub sig: Vec<u8>,
    /// Idempotency key of the logical operation.
    pub idem_key: IdemKey,
    /// Creation timestamp.
    pub created_at: String,
    /// Receipt superseded by this one.
    pub supersedes_receipt_id: Option<ReceiptId>,
    /// Context record identifier.
    pub context_id: ContextId,
    /// Decision record identifier.
    pub decision_id: DecisionId,
    /// Outcome status string.
    pub outcome_status: OutcomeStatus,
    /// Approval identifier, when one is attached.
    pub approval_id: Option<ApprovalId>,
    /// Policy hash the decision was made under.
    pub policy_hash: String,
    /// Whether the outcome is terminal.
    pub is_final: bool,
    /// Credential expiry, when credentials were issued.
    pub expires_at: Option<String>,
}

/// Canonicalizes, digests, and signs a receipt body.
///
/// # Errors
///
/// Returns [`ReceiptError::MissingField`] when the identity chain is
/// incomplete, and propagates canonicalization and signing failures.
pub fn make_receipt(
    input: MakeReceiptInput,
    signer: &dyn Signer,
) -> Result<StoredReceipt, ReceiptError> {
    if input.idem_key.is_empty() {
        return Err(ReceiptError::MissingField("idem_key"));
    }
    if input.context_id.is_empty() {
        return Err(ReceiptError::MissingField("context_id"));
    }
    if input.decision_id.is_empty() {
        return Err(ReceiptError::MissingField("decision_id"));
    }
    if input.policy.policy_hash.is_empty() {
        return Err(ReceiptError::MissingField("policy_hash"));
    }

    let body = json!({
        "schema": RECEIPT_SCHEMA,
        "created_at": &input.created_at,
        "context_id": &input.context_id,
        "decision_id": &input.decision_id,
        "actor": &input.actor,
        "request": &input.request,
        "policy": &input.policy,
        "approval": &input.approval,
        "credential_grant": &input.credential_grant,
        "outcome": &input.outcome,
    });

    let canonical = canonical_bytes(&body)?;
    let digest = digest_bytes(&canonical);
    let body_digest = digest_with_prefix(&canonical);
    let sig = signer.sign(&digest)?;

    let approval_id = input
        .approval
        .as_ref()
        .and_then(|approval| approval.approval_id.clone());
    let expires_at = input.outcome.expires_at.clone();
    let is_final = input.outcome.status.is_final();

    Ok(StoredReceipt {
        receipt_id: ReceiptId::new(body_digest.clone()),
        body_digest,
        body_json: canonical,
        key_id: signer.key_id().clone(),
        sig,
        idem_key: input.idem_key,
        created_at: input.created_at,
        supersedes_receipt_id: input.supersedes_receipt_id,
        context_id: input.context_id,
        decision_id: input.decision_id,
        outcome_status: input.outcome.status,
        approval_id,
        policy_hash: input.policy.policy_hash,
        is_final,
        expires_at,
    })
}
