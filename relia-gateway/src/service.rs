// relia-gateway/src/service.rs
// ============================================================================
// Module: Authorize and Approval Services
// Description: Plan-then-commit authorize flow and approval finalization.
// Purpose: Produce exactly-once signed receipts for every authorize outcome.
// Dependencies: relia-core, ed25519-dalek, rand, serde, time
// ============================================================================

//! ## Overview
//! The authorize flow observes the idempotency and approval state in the
//! ledger, plans the next step from the state machine's total plan table,
//! and commits the matching transition in one ledger transaction. Cached
//! terminal branches replay the stored outcome; the `issuing` status guards
//! against concurrent double issuance. Approval finalization emits a
//! superseding receipt and, when approved, hands off to credential issuance.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;

use relia_core::ApprovalId;
use relia_core::ApprovalRow;
use relia_core::ApprovalStatus;
use relia_core::ApprovalSummary;
use relia_core::CanonError;
use relia_core::ContextEvidence;
use relia_core::ContextInputs;
use relia_core::ContextRecord;
use relia_core::ContextRow;
use relia_core::ContextSource;
use relia_core::DecisionPolicy;
use relia_core::DecisionRecord;
use relia_core::DecisionRow;
use relia_core::IdemKey;
use relia_core::IdemKeyInput;
use relia_core::IdemKeyRow;
use relia_core::IdemStatus;
use relia_core::KeyId;
use relia_core::KeyRow;
use relia_core::Ledger;
use relia_core::LedgerError;
use relia_core::LocalSigner;
use relia_core::MakeReceiptInput;
use relia_core::MemoryLedger;
use relia_core::NextAction;
use relia_core::OutboxRow;
use relia_core::OutboxStatus;
use relia_core::OutcomeError;
use relia_core::OutcomeStatus;
use relia_core::PackError;
use relia_core::PackInput;
use relia_core::PolicyVersionRow;
use relia_core::ReceiptActor;
use relia_core::ReceiptApproval;
use relia_core::ReceiptApprover;
use relia_core::ReceiptCredentialGrant;
use relia_core::ReceiptError;
use relia_core::ReceiptId;
use relia_core::ReceiptOutcome;
use relia_core::ReceiptPolicy;
use relia_core::ReceiptRequest;
use relia_core::RecordError;
use relia_core::Signer;
use relia_core::StoredReceipt;
use relia_core::Verdict;
use relia_core::VerifyError;
use relia_core::build_context;
use relia_core::build_decision;
use relia_core::build_zip;
use relia_core::canonical_bytes;
use relia_core::compute_idem_key;
use relia_core::core::grade;
use relia_core::core::grade::GradeInput;
use relia_core::core::policy;
use relia_core::core::policy::LoadedPolicy;
use relia_core::core::policy::PolicyDecision;
use relia_core::core::policy::PolicyInput;
use relia_core::digest_with_prefix;
use relia_core::make_receipt;
use relia_core::transition_from_verdict;
use relia_core::verify_receipt;

use crate::auth::ActorClaims;
use crate::broker::AssumeRoleInput;
use crate::broker::BrokerError;
use crate::broker::CredentialBroker;
use crate::broker::DevBroker;
use crate::slack::ApprovalMessage;

// ============================================================================
// SECTION: Requests and Responses
// ============================================================================

/// Evidence attached to an authorize request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestEvidence {
    /// Digest of the change plan.
    #[serde(default)]
    pub plan_digest: Option<String>,
    /// Link to the reviewed diff.
    #[serde(default)]
    pub diff_url: Option<String>,
}

/// Body of `POST /v1/authorize`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
    /// Caller-chosen request identifier.
    #[serde(default)]
    pub request_id: String,
    /// Requested action.
    #[serde(default)]
    pub action: String,
    /// Target resource.
    #[serde(default)]
    pub resource: String,
    /// Target environment.
    #[serde(default)]
    pub env: String,
    /// Structured intent.
    #[serde(default)]
    pub intent: Option<Value>,
    /// Supporting evidence.
    #[serde(default)]
    pub evidence: RequestEvidence,
}

/// Approval stub carried on pending responses.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalStub {
    /// Approval identifier.
    pub approval_id: ApprovalId,
    /// Approval status string.
    pub status: String,
}

/// Response of `POST /v1/authorize`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeResponse {
    /// Verdict string.
    pub verdict: String,
    /// Context record identifier.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub context_id: String,
    /// Decision record identifier.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub decision_id: String,
    /// Latest receipt identifier.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub receipt_id: String,
    /// Approval stub, when the request is parked behind one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalStub>,
    /// Error string on cached or terminal error branches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthorizeResponse {
    fn bare(verdict: Verdict) -> Self {
        Self {
            verdict: verdict.as_str().to_string(),
            context_id: String::new(),
            decision_id: String::new(),
            receipt_id: String::new(),
            approval: None,
            error: None,
        }
    }
}

/// Result of verifying one receipt.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    /// Receipt identifier.
    pub receipt_id: String,
    /// Whether digest identity and signature both held.
    pub valid: bool,
    /// Completeness grade, when the receipt verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    /// Failure kind, when verification failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Service failures surfaced to the HTTP layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The policy could not be loaded or parsed.
    #[error("policy error: {0}")]
    Policy(String),
    /// Canonicalization failed.
    #[error(transparent)]
    Canon(#[from] CanonError),
    /// Record building failed.
    #[error(transparent)]
    Record(#[from] RecordError),
    /// Receipt assembly failed.
    #[error(transparent)]
    Receipt(#[from] ReceiptError),
    /// Ledger failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Credential broker failure outside a terminal issuance.
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// Pack building failed.
    #[error(transparent)]
    Pack(#[from] PackError),
    /// A referenced record does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The verifying key for a stored receipt is not registered.
    #[error("public key not configured")]
    PublicKeyMissing,
    /// An approval transition was invalid.
    #[error("invalid approval transition: {0}")]
    InvalidTransition(String),
    /// Ledger state is inconsistent with the planned action.
    #[error("{0}")]
    State(String),
    /// The service was constructed with inconsistent inputs.
    #[error("invalid service input: {0}")]
    Input(&'static str),
}

// ============================================================================
// SECTION: Service Construction
// ============================================================================

/// Injectable collaborators for the authorize service.
pub struct AuthorizeServiceInput {
    /// Path to the policy YAML.
    pub policy_path: PathBuf,
    /// Ledger backend; defaults to the in-memory ledger.
    pub ledger: Option<Arc<dyn Ledger>>,
    /// Receipt signer; defaults to a freshly generated dev key.
    pub signer: Option<Arc<dyn Signer>>,
    /// Verifying key for the signer; required when a signer is injected.
    pub public_key: Option<VerifyingKey>,
    /// Credential broker; defaults to [`DevBroker`].
    pub broker: Option<Arc<dyn CredentialBroker>>,
    /// Chat channel approval prompts are queued for.
    pub slack_channel: Option<String>,
    /// Default issuing region.
    pub broker_region: Option<String>,
}

impl AuthorizeServiceInput {
    /// Builds an input with defaults for everything but the policy path.
    #[must_use]
    pub fn for_policy(policy_path: impl Into<PathBuf>) -> Self {
        Self {
            policy_path: policy_path.into(),
            ledger: None,
            signer: None,
            public_key: None,
            broker: None,
            slack_channel: None,
            broker_region: None,
        }
    }
}

/// Authorize and approval service.
pub struct AuthorizeService {
    ledger: Arc<dyn Ledger>,
    signer: Arc<dyn Signer>,
    public_key: VerifyingKey,
    broker: Arc<dyn CredentialBroker>,
    policy_path: PathBuf,
    slack_channel: Option<String>,
    broker_region: String,
}

impl AuthorizeService {
    /// Builds the service, registering the signer's public key in the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Input`] on inconsistent inputs and
    /// [`ServiceError::Ledger`] when key registration fails.
    pub fn new(input: AuthorizeServiceInput) -> Result<Self, ServiceError> {
        if input.policy_path.as_os_str().is_empty() {
            return Err(ServiceError::Input("policy_path is required"));
        }

        let ledger = input
            .ledger
            .unwrap_or_else(|| Arc::new(MemoryLedger::new()));

        let (signer, public_key): (Arc<dyn Signer>, VerifyingKey) = match input.signer {
            Some(signer) => {
                let public_key = input
                    .public_key
                    .ok_or(ServiceError::Input("public_key is required with a signer"))?;
                (signer, public_key)
            }
            None => {
                let local = LocalSigner::generate(KeyId::new("dev"));
                let public_key = local.public_key();
                (Arc::new(local), public_key)
            }
        };

        let service = Self {
            ledger,
            signer,
            public_key,
            broker: input.broker.unwrap_or_else(|| Arc::new(DevBroker)),
            policy_path: input.policy_path,
            slack_channel: input.slack_channel,
            broker_region: input
                .broker_region
                .unwrap_or_else(|| "us-east-1".to_string()),
        };

        service.ledger.put_key(&KeyRow {
            key_id: service.signer.key_id().clone(),
            public_key: service.public_key.to_bytes().to_vec(),
            created_at: now_rfc3339(),
            rotated_at: None,
        })?;

        Ok(service)
    }

    /// Returns the ledger the service persists through.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Returns the verifying key for receipts signed by this service.
    #[must_use]
    pub const fn public_key(&self) -> &VerifyingKey {
        &self.public_key
    }
}

/// Returns the current UTC time as an RFC3339 string.
#[must_use]
pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::new())
}

// ============================================================================
// SECTION: Authorize Flow
// ============================================================================

/// Partial receipt body view used to rebuild superseding receipts.
#[derive(Debug, Deserialize)]
struct ReceiptBodyView {
    #[serde(default)]
    actor: ReceiptActor,
    #[serde(default)]
    request: ReceiptRequest,
    #[serde(default)]
    policy: ReceiptPolicy,
}

impl AuthorizeService {
    /// Runs one authorize call to a stable outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] on policy, ledger, or state failures; cached
    /// error branches are reported inside the response instead.
    pub fn authorize(
        &self,
        claims: &ActorClaims,
        request: &AuthorizeRequest,
        created_at: &str,
    ) -> Result<AuthorizeResponse, ServiceError> {
        let idem_key = compute_idem_key(&IdemKeyInput {
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
        })?;

        if let Some(idem_row) = self.ledger.get_idem_key(idem_key.as_str())? {
            let Some(status) = IdemStatus::parse(&idem_row.status) else {
                let mut response = AuthorizeResponse::bare(Verdict::Deny);
                response.error = Some("unsupported state".to_string());
                return Ok(response);
            };

            match status {
                IdemStatus::Allowed => return self.cached_response(Verdict::Allow, &idem_row),
                IdemStatus::Denied => return self.cached_response(Verdict::Deny, &idem_row),
                IdemStatus::Errored => {
                    let mut response = AuthorizeResponse::bare(Verdict::Deny);
                    response.error = Some("previous error".to_string());
                    return Ok(response);
                }
                IdemStatus::Issuing => {
                    let mut response = AuthorizeResponse::bare(Verdict::Allow);
                    response.error = Some("issuing in progress".to_string());
                    return Ok(response);
                }
                IdemStatus::ApprovedReady => {
                    let approval = self.ledger.get_approval_by_idem_key(idem_key.as_str())?;
                    return self.issue_credentials(&idem_row, approval.as_ref(), &claims.token, created_at);
                }
                IdemStatus::PendingApproval => {
                    let approval = self.ledger.get_approval_by_idem_key(idem_key.as_str())?;
                    match approval.as_ref().map(|row| row.status) {
                        Some(ApprovalStatus::Pending) => {
                            return self.pending_response(&idem_row, approval.as_ref());
                        }
                        Some(ApprovalStatus::Denied) => {
                            return self.cached_response(Verdict::Deny, &idem_row);
                        }
                        Some(ApprovalStatus::Approved) => {
                            return self.issue_credentials(
                                &idem_row,
                                approval.as_ref(),
                                &claims.token,
                                created_at,
                            );
                        }
                        None => {}
                    }
                }
            }
        }

        self.evaluate_and_commit(&idem_key, claims, request, created_at)
    }

    fn cached_response(
        &self,
        verdict: Verdict,
        idem_row: &IdemKeyRow,
    ) -> Result<AuthorizeResponse, ServiceError> {
        let mut response = AuthorizeResponse::bare(verdict);
        let receipt_id = idem_row
            .final_receipt_id
            .as_ref()
            .or(idem_row.latest_receipt_id.as_ref());
        if let Some(receipt_id) = receipt_id {
            if let Some(receipt) = self.ledger.get_receipt(receipt_id.as_str())? {
                response.context_id = receipt.context_id.as_str().to_string();
                response.decision_id = receipt.decision_id.as_str().to_string();
                response.receipt_id = receipt.receipt_id.as_str().to_string();
            }
        }
        Ok(response)
    }

    fn pending_response(
        &self,
        idem_row: &IdemKeyRow,
        approval: Option<&ApprovalRow>,
    ) -> Result<AuthorizeResponse, ServiceError> {
        let mut response = self.cached_response(Verdict::RequireApproval, idem_row)?;
        let approval_id = approval
            .map(|row| row.approval_id.clone())
            .or_else(|| idem_row.approval_id.clone());
        if let Some(approval_id) = approval_id {
            response.approval = Some(ApprovalStub {
                approval_id,
                status: ApprovalStatus::Pending.as_str().to_string(),
            });
        }
        Ok(response)
    }

    fn load_policy(&self) -> Result<LoadedPolicy, ServiceError> {
        let bytes = std::fs::read(&self.policy_path)
            .map_err(|err| ServiceError::Policy(err.to_string()))?;
        LoadedPolicy::from_bytes(&bytes).map_err(|err| ServiceError::Policy(err.to_string()))
    }

    fn evaluate_and_commit(
        &self,
        idem_key: &IdemKey,
        claims: &ActorClaims,
        request: &AuthorizeRequest,
        created_at: &str,
    ) -> Result<AuthorizeResponse, ServiceError> {
        let loaded = self.load_policy()?;
        let decision_result = policy::evaluate(
            &loaded.policy,
            &loaded.hash,
            &PolicyInput {
                action: request.action.clone(),
                resource: request.resource.clone(),
                env: request.env.clone(),
            },
        );

        let source = ContextSource {
            kind: "github_actions".to_string(),
            repo: claims.repo.clone(),
            workflow: claims.workflow.clone(),
            run_id: claims.run_id.clone(),
            actor: claims.subject.clone(),
            git_ref: None,
            sha: claims.sha.clone(),
        };
        let inputs = ContextInputs {
            action: request.action.clone(),
            resource: request.resource.clone(),
            env: request.env.clone(),
            intent: request.intent.clone(),
        };
        let evidence = ContextEvidence {
            plan_digest: request.evidence.plan_digest.clone(),
            diff_url: request.evidence.diff_url.clone(),
        };
        let (context, context_bytes) = build_context(source, inputs, evidence, created_at)?;

        let policy_meta = DecisionPolicy {
            policy_id: decision_result.policy_id.clone(),
            policy_version: decision_result.policy_version.clone(),
            policy_hash: decision_result.policy_hash.clone(),
        };
        let (decision, decision_bytes) = build_decision(
            &context.context_id,
            policy_meta.clone(),
            decision_result.verdict.as_str(),
            decision_result.reason_codes.clone(),
            decision_result.require_approval,
            decision_result.risk.clone(),
            created_at,
        )?;

        let (idem_status, action) = transition_from_verdict(decision_result.verdict);

        let approval = match action {
            NextAction::ReturnPending => {
                let approval_id = new_approval_id();
                Some(ReceiptApproval {
                    required: true,
                    approval_id: Some(approval_id),
                    status: Some(ApprovalStatus::Pending.as_str().to_string()),
                    approved_at: None,
                    approver: None,
                })
            }
            _ => None,
        };

        let outcome_status = match action {
            NextAction::ReturnDenied => OutcomeStatus::Denied,
            NextAction::ReturnPending => OutcomeStatus::ApprovalPending,
            _ => OutcomeStatus::IssuingCredentials,
        };

        let receipt = make_receipt(
            MakeReceiptInput {
                created_at: created_at.to_string(),
                idem_key: idem_key.clone(),
                supersedes_receipt_id: None,
                context_id: context.context_id.clone(),
                decision_id: decision.decision_id.clone(),
                actor: actor_from_claims(claims),
                request: request_view(request),
                policy: policy_meta.clone(),
                approval: approval.clone(),
                credential_grant: None,
                outcome: ReceiptOutcome::status_only(outcome_status),
            },
            self.signer.as_ref(),
        )?;

        let approval_id = approval
            .as_ref()
            .and_then(|stub| stub.approval_id.clone());

        self.ledger.with_tx(&mut |tx| {
            tx.put_policy_version(&PolicyVersionRow {
                policy_hash: loaded.hash.clone(),
                policy_id: loaded.policy.policy_id.clone(),
                policy_version: loaded.policy.policy_version.clone(),
                policy_yaml: loaded.bytes.clone(),
                created_at: created_at.to_string(),
            })?;
            tx.put_context(&ContextRow {
                context_id: context.context_id.clone(),
                body_json: context_bytes.clone(),
                created_at: created_at.to_string(),
            })?;
            tx.put_decision(&DecisionRow {
                decision_id: decision.decision_id.clone(),
                context_id: context.context_id.clone(),
                policy_hash: loaded.hash.clone(),
                verdict: decision.verdict.clone(),
                body_json: decision_bytes.clone(),
                created_at: created_at.to_string(),
            })?;
            tx.put_receipt(&receipt)?;

            if let Some(approval_id) = &approval_id {
                tx.put_approval(&ApprovalRow {
                    approval_id: approval_id.clone(),
                    idem_key: idem_key.clone(),
                    status: ApprovalStatus::Pending,
                    slack_channel: None,
                    slack_msg_ts: None,
                    approved_by: None,
                    approved_at: None,
                    created_at: created_at.to_string(),
                    updated_at: created_at.to_string(),
                })?;
                if let Some(channel) = &self.slack_channel {
                    let message = ApprovalMessage {
                        approval_id: approval_id.as_str().to_string(),
                        action: request.action.clone(),
                        resource: request.resource.clone(),
                        env: request.env.clone(),
                        risk: decision_result.risk.clone(),
                        reason: decision_result.reason.clone(),
                        requested_by: Some(claims.subject.clone()),
                    };
                    let message_json = serde_json::to_vec(&message)
                        .map_err(|err| LedgerError::Invalid(err.to_string()))?;
                    tx.put_outbox(&OutboxRow {
                        notification_id: format!("slack:{approval_id}"),
                        approval_id: approval_id.clone(),
                        channel: channel.clone(),
                        message_json,
                        status: OutboxStatus::Pending,
                        attempt_count: 0,
                        next_attempt_at: created_at.to_string(),
                        last_error: None,
                        sent_at: None,
                        created_at: created_at.to_string(),
                        updated_at: created_at.to_string(),
                    })?;
                }
            }

            tx.put_idem_key(&IdemKeyRow {
                idem_key: idem_key.clone(),
                status: idem_status.as_str().to_string(),
                approval_id: approval_id.clone(),
                latest_receipt_id: Some(receipt.receipt_id.clone()),
                final_receipt_id: receipt.is_final.then(|| receipt.receipt_id.clone()),
                created_at: created_at.to_string(),
                updated_at: created_at.to_string(),
                ttl_expires_at: None,
            })?;
            Ok(())
        })?;

        let mut response = AuthorizeResponse {
            verdict: decision_result.verdict.as_str().to_string(),
            context_id: context.context_id.as_str().to_string(),
            decision_id: decision.decision_id.as_str().to_string(),
            receipt_id: receipt.receipt_id.as_str().to_string(),
            approval: approval_id.clone().map(|approval_id| ApprovalStub {
                approval_id,
                status: ApprovalStatus::Pending.as_str().to_string(),
            }),
            error: None,
        };

        if action == NextAction::IssueCredentials {
            response = self.finalize_issuance(
                idem_key,
                &receipt,
                &decision_result,
                None,
                &claims.token,
                created_at,
            )?;
        }

        Ok(response)
    }

    /// Re-derives the decision for an approved key and issues credentials.
    fn issue_credentials(
        &self,
        idem_row: &IdemKeyRow,
        approval: Option<&ApprovalRow>,
        web_identity_token: &str,
        created_at: &str,
    ) -> Result<AuthorizeResponse, ServiceError> {
        let latest_id = idem_row
            .latest_receipt_id
            .clone()
            .ok_or_else(|| ServiceError::State("missing latest receipt".to_string()))?;
        let latest = self
            .ledger
            .get_receipt(latest_id.as_str())?
            .ok_or_else(|| ServiceError::State("missing latest receipt".to_string()))?;

        let policy_row = self
            .ledger
            .get_policy_version(&latest.policy_hash)?
            .ok_or_else(|| ServiceError::State("missing policy version".to_string()))?;
        let loaded = LoadedPolicy::from_bytes(&policy_row.policy_yaml)
            .map_err(|err| ServiceError::Policy(err.to_string()))?;

        let body: ReceiptBodyView = serde_json::from_slice(&latest.body_json)
            .map_err(|err| ServiceError::State(format!("malformed receipt body: {err}")))?;

        let decision_result = policy::evaluate(
            &loaded.policy,
            &policy_row.policy_hash,
            &PolicyInput {
                action: body.request.action.clone(),
                resource: body.request.resource.clone(),
                env: body.request.env.clone(),
            },
        );
        if decision_result.verdict == Verdict::Deny {
            return Err(ServiceError::State(
                "policy no longer allows issuance".to_string(),
            ));
        }
        if decision_result.aws_role_arn.is_none() {
            return Err(ServiceError::State("missing role arn".to_string()));
        }

        // Guard transition: a concurrent retry now observes `issuing`.
        self.mark_issuing(idem_row, created_at)?;

        let approval_view = approval.map(|row| ReceiptApproval {
            required: true,
            approval_id: Some(row.approval_id.clone()),
            status: Some(row.status.as_str().to_string()),
            approved_at: row.approved_at.clone(),
            approver: row.approved_by.as_ref().map(|id| ReceiptApprover {
                kind: "slack_user".to_string(),
                id: id.clone(),
                display: id.clone(),
            }),
        });

        self.broker_and_finalize(
            &idem_row.idem_key,
            &latest,
            &body,
            &decision_result,
            approval_view,
            web_identity_token,
            created_at,
            true,
        )
    }

    fn mark_issuing(
        &self,
        idem_row: &IdemKeyRow,
        created_at: &str,
    ) -> Result<(), ServiceError> {
        let mut next = idem_row.clone();
        next.status = IdemStatus::Issuing.as_str().to_string();
        next.updated_at = created_at.to_string();
        self.ledger.put_idem_key(&next)?;
        Ok(())
    }

    /// Finalizes issuance directly after a first-entry `allow` verdict.
    fn finalize_issuance(
        &self,
        idem_key: &IdemKey,
        prior: &StoredReceipt,
        decision_result: &PolicyDecision,
        approval_view: Option<ReceiptApproval>,
        web_identity_token: &str,
        created_at: &str,
    ) -> Result<AuthorizeResponse, ServiceError> {
        let body: ReceiptBodyView = serde_json::from_slice(&prior.body_json)
            .map_err(|err| ServiceError::State(format!("malformed receipt body: {err}")))?;
        self.broker_and_finalize(
            idem_key,
            prior,
            &body,
            decision_result,
            approval_view,
            web_identity_token,
            created_at,
            true,
        )
    }

    /// Calls the broker and commits the outcome. With `terminal_on_failure`,
    /// a broker error persists an `issue_failed` receipt and an `errored`
    /// key; without it the error propagates and the key is left untouched.
    #[allow(clippy::too_many_arguments)]
    fn broker_and_finalize(
        &self,
        idem_key: &IdemKey,
        prior: &StoredReceipt,
        body: &ReceiptBodyView,
        decision_result: &PolicyDecision,
        approval_view: Option<ReceiptApproval>,
        web_identity_token: &str,
        created_at: &str,
        terminal_on_failure: bool,
    ) -> Result<AuthorizeResponse, ServiceError> {
        let role_arn = decision_result
            .aws_role_arn
            .clone()
            .ok_or_else(|| ServiceError::State("missing role arn".to_string()))?;

        let broker_result = self.broker.assume_role(&AssumeRoleInput {
            role_arn: role_arn.clone(),
            web_identity_token: web_identity_token.to_string(),
            ttl_seconds: decision_result.ttl_seconds,
            region: self.broker_region.clone(),
        });

        match broker_result {
            Ok(credentials) => {
                let scope_digest = scope_digest(
                    &body.request.action,
                    &body.request.resource,
                    &body.request.env,
                    &role_arn,
                )?;
                let grant = ReceiptCredentialGrant {
                    provider: "aws_sts".to_string(),
                    method: "AssumeRoleWithWebIdentity".to_string(),
                    role_arn,
                    region: self.broker_region.clone(),
                    ttl_seconds: decision_result.ttl_seconds,
                    scope_digest,
                };
                let receipt = make_receipt(
                    MakeReceiptInput {
                        created_at: created_at.to_string(),
                        idem_key: idem_key.clone(),
                        supersedes_receipt_id: Some(prior.receipt_id.clone()),
                        context_id: prior.context_id.clone(),
                        decision_id: prior.decision_id.clone(),
                        actor: body.actor.clone(),
                        request: body.request.clone(),
                        policy: body.policy.clone(),
                        approval: approval_view,
                        credential_grant: Some(grant),
                        outcome: ReceiptOutcome {
                            status: OutcomeStatus::IssuedCredentials,
                            issued_at: Some(created_at.to_string()),
                            expires_at: Some(credentials.expires_at.clone()),
                            error: None,
                        },
                    },
                    self.signer.as_ref(),
                )?;

                self.commit_terminal(idem_key, &receipt, IdemStatus::Allowed, created_at)?;

                Ok(AuthorizeResponse {
                    verdict: Verdict::Allow.as_str().to_string(),
                    context_id: prior.context_id.as_str().to_string(),
                    decision_id: prior.decision_id.as_str().to_string(),
                    receipt_id: receipt.receipt_id.as_str().to_string(),
                    approval: None,
                    error: None,
                })
            }
            Err(err) => {
                if !terminal_on_failure {
                    return Err(ServiceError::Broker(err));
                }
                let receipt = make_receipt(
                    MakeReceiptInput {
                        created_at: created_at.to_string(),
                        idem_key: idem_key.clone(),
                        supersedes_receipt_id: Some(prior.receipt_id.clone()),
                        context_id: prior.context_id.clone(),
                        decision_id: prior.decision_id.clone(),
                        actor: body.actor.clone(),
                        request: body.request.clone(),
                        policy: body.policy.clone(),
                        approval: approval_view,
                        credential_grant: None,
                        outcome: ReceiptOutcome {
                            status: OutcomeStatus::IssueFailed,
                            issued_at: None,
                            expires_at: None,
                            error: Some(OutcomeError {
                                code: "broker_error".to_string(),
                                msg: err.to_string(),
                            }),
                        },
                    },
                    self.signer.as_ref(),
                )?;

                self.commit_terminal(idem_key, &receipt, IdemStatus::Errored, created_at)?;

                let mut response = AuthorizeResponse::bare(Verdict::Deny);
                response.context_id = prior.context_id.as_str().to_string();
                response.decision_id = prior.decision_id.as_str().to_string();
                response.receipt_id = receipt.receipt_id.as_str().to_string();
                response.error = Some(err.to_string());
                Ok(response)
            }
        }
    }

    fn commit_terminal(
        &self,
        idem_key: &IdemKey,
        receipt: &StoredReceipt,
        status: IdemStatus,
        created_at: &str,
    ) -> Result<(), ServiceError> {
        self.ledger.with_tx(&mut |tx| {
            tx.put_receipt(receipt)?;
            let mut row = tx.get_idem_key(idem_key.as_str())?.unwrap_or(IdemKeyRow {
                idem_key: idem_key.clone(),
                status: String::new(),
                approval_id: None,
                latest_receipt_id: None,
                final_receipt_id: None,
                created_at: created_at.to_string(),
                updated_at: created_at.to_string(),
                ttl_expires_at: None,
            });
            row.status = status.as_str().to_string();
            row.latest_receipt_id = Some(receipt.receipt_id.clone());
            if row.final_receipt_id.is_none() {
                row.final_receipt_id = Some(receipt.receipt_id.clone());
            }
            row.updated_at = created_at.to_string();
            tx.put_idem_key(&row)?;
            Ok(())
        })?;
        Ok(())
    }
}

fn actor_from_claims(claims: &ActorClaims) -> ReceiptActor {
    ReceiptActor {
        kind: "workload".to_string(),
        subject: claims.subject.clone(),
        issuer: claims.issuer.clone(),
        repo: claims.repo.clone(),
        workflow: claims.workflow.clone(),
        run_id: claims.run_id.clone(),
        sha: claims.sha.clone(),
    }
}

fn request_view(request: &AuthorizeRequest) -> ReceiptRequest {
    ReceiptRequest {
        request_id: request.request_id.clone(),
        action: request.action.clone(),
        resource: request.resource.clone(),
        env: request.env.clone(),
        intent: request.intent.clone(),
    }
}

fn scope_digest(
    action: &str,
    resource: &str,
    env: &str,
    role_arn: &str,
) -> Result<String, CanonError> {
    let view = serde_json::json!({
        "action": action,
        "resource": resource,
        "env": env,
        "role_arn": role_arn,
    });
    Ok(digest_with_prefix(&canonical_bytes(&view)?))
}

fn new_approval_id() -> ApprovalId {
    let mut buf = [0_u8; 16];
    OsRng.fill_bytes(&mut buf);
    ApprovalId::new(format!(
        "approval-{}",
        relia_core::core::canonical::hex_encode(&buf)
    ))
}

// ============================================================================
// SECTION: Approval Flow
// ============================================================================

impl AuthorizeService {
    /// Finalizes an approval and emits the follow-up superseding receipt.
    ///
    /// Idempotent: re-finalizing with the same verdict returns the existing
    /// follow-up receipt. A conflicting verdict is rejected without mutating
    /// state.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] for unknown approvals and
    /// [`ServiceError::InvalidTransition`] for conflicting verdicts.
    pub fn approve(
        &self,
        approval_id: &ApprovalId,
        verdict: ApprovalStatus,
        approved_at: &str,
        approver: Option<ReceiptApprover>,
    ) -> Result<ReceiptId, ServiceError> {
        if verdict == ApprovalStatus::Pending {
            return Err(ServiceError::InvalidTransition(
                "cannot transition back to pending".to_string(),
            ));
        }

        let approval = self
            .ledger
            .get_approval(approval_id.as_str())?
            .ok_or(ServiceError::NotFound("approval"))?;
        let idem_row = self
            .ledger
            .get_idem_key(approval.idem_key.as_str())?
            .ok_or_else(|| ServiceError::State("missing idempotency key".to_string()))?;

        if approval.status != ApprovalStatus::Pending {
            if approval.status == verdict {
                return idem_row
                    .final_receipt_id
                    .or(idem_row.latest_receipt_id)
                    .ok_or_else(|| ServiceError::State("missing follow-up receipt".to_string()));
            }
            return Err(ServiceError::InvalidTransition(format!(
                "approval already {}",
                approval.status.as_str()
            )));
        }

        let latest_id = idem_row
            .latest_receipt_id
            .clone()
            .ok_or_else(|| ServiceError::State("missing latest receipt".to_string()))?;
        let latest = self
            .ledger
            .get_receipt(latest_id.as_str())?
            .ok_or_else(|| ServiceError::State("missing latest receipt".to_string()))?;
        let body: ReceiptBodyView = serde_json::from_slice(&latest.body_json)
            .map_err(|err| ServiceError::State(format!("malformed receipt body: {err}")))?;

        let approver_id = approver.as_ref().map(|approver| approver.id.clone());
        let approval_view = ReceiptApproval {
            required: true,
            approval_id: Some(approval_id.clone()),
            status: Some(verdict.as_str().to_string()),
            approved_at: Some(approved_at.to_string()),
            approver: approver.clone(),
        };

        let outcome_status = match verdict {
            ApprovalStatus::Denied => OutcomeStatus::Denied,
            _ => OutcomeStatus::ApprovalApproved,
        };

        let receipt = make_receipt(
            MakeReceiptInput {
                created_at: approved_at.to_string(),
                idem_key: idem_row.idem_key.clone(),
                supersedes_receipt_id: Some(latest.receipt_id.clone()),
                context_id: latest.context_id.clone(),
                decision_id: latest.decision_id.clone(),
                actor: body.actor.clone(),
                request: body.request.clone(),
                policy: body.policy.clone(),
                approval: Some(approval_view.clone()),
                credential_grant: None,
                outcome: ReceiptOutcome::status_only(outcome_status),
            },
            self.signer.as_ref(),
        )?;

        let idem_status = match verdict {
            ApprovalStatus::Denied => IdemStatus::Denied,
            _ => IdemStatus::ApprovedReady,
        };

        self.ledger.with_tx(&mut |tx| {
            let mut next_approval = approval.clone();
            next_approval.status = verdict;
            next_approval.approved_by = approver_id.clone();
            next_approval.approved_at = Some(approved_at.to_string());
            next_approval.updated_at = approved_at.to_string();
            tx.put_approval(&next_approval)?;

            tx.put_receipt(&receipt)?;

            let mut next_idem = idem_row.clone();
            next_idem.status = idem_status.as_str().to_string();
            next_idem.latest_receipt_id = Some(receipt.receipt_id.clone());
            if verdict == ApprovalStatus::Denied {
                next_idem.final_receipt_id = Some(receipt.receipt_id.clone());
            }
            next_idem.updated_at = approved_at.to_string();
            tx.put_idem_key(&next_idem)?;
            Ok(())
        })?;

        if verdict == ApprovalStatus::Denied {
            return Ok(receipt.receipt_id);
        }

        // Inline issuance. Any failure here leaves the key approved_ready so
        // a later authorize retry can issue with a live web identity token.
        let issued = self
            .decision_for_issuance(&receipt, &body)
            .and_then(|decision_result| {
                self.broker_and_finalize(
                    &idem_row.idem_key,
                    &receipt,
                    &body,
                    &decision_result,
                    Some(approval_view),
                    "",
                    approved_at,
                    false,
                )
            });
        match issued {
            Ok(response) if !response.receipt_id.is_empty() => {
                Ok(ReceiptId::new(response.receipt_id))
            }
            _ => Ok(receipt.receipt_id),
        }
    }

    fn decision_for_issuance(
        &self,
        latest: &StoredReceipt,
        body: &ReceiptBodyView,
    ) -> Result<PolicyDecision, ServiceError> {
        let policy_row = self
            .ledger
            .get_policy_version(&latest.policy_hash)?
            .ok_or_else(|| ServiceError::State("missing policy version".to_string()))?;
        let loaded = LoadedPolicy::from_bytes(&policy_row.policy_yaml)
            .map_err(|err| ServiceError::Policy(err.to_string()))?;
        Ok(policy::evaluate(
            &loaded.policy,
            &policy_row.policy_hash,
            &PolicyInput {
                action: body.request.action.clone(),
                resource: body.request.resource.clone(),
                env: body.request.env.clone(),
            },
        ))
    }
}

// ============================================================================
// SECTION: Verify and Pack
// ============================================================================

impl AuthorizeService {
    /// Verifies a stored receipt and grades its completeness.
    ///
    /// Verification failure is part of the outcome, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] for unknown receipts and
    /// [`ServiceError::PublicKeyMissing`] when the signing key is not
    /// registered.
    pub fn verify(&self, receipt_id: &str) -> Result<VerifyOutcome, ServiceError> {
        let receipt = self
            .ledger
            .get_receipt(receipt_id)?
            .ok_or(ServiceError::NotFound("receipt"))?;

        let key_row = self
            .ledger
            .get_key(receipt.key_id.as_str())?
            .ok_or(ServiceError::PublicKeyMissing)?;
        let key_bytes: [u8; 32] = key_row
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| ServiceError::PublicKeyMissing)?;
        let public_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| ServiceError::PublicKeyMissing)?;

        match verify_receipt(&receipt, &public_key) {
            Ok(()) => {
                let grade = self.grade_receipt(&receipt, true)?;
                Ok(VerifyOutcome {
                    receipt_id: receipt_id.to_string(),
                    valid: true,
                    grade: Some(grade),
                    error: None,
                })
            }
            Err(err) => Ok(VerifyOutcome {
                receipt_id: receipt_id.to_string(),
                valid: false,
                grade: None,
                error: Some(verify_error_kind(&err).to_string()),
            }),
        }
    }

    fn grade_receipt(
        &self,
        receipt: &StoredReceipt,
        valid: bool,
    ) -> Result<String, ServiceError> {
        let context = self
            .ledger
            .get_context(receipt.context_id.as_str())?
            .and_then(|row| serde_json::from_slice::<ContextRecord>(&row.body_json).ok());
        let decision = self
            .ledger
            .get_decision(receipt.decision_id.as_str())?
            .and_then(|row| serde_json::from_slice::<DecisionRecord>(&row.body_json).ok());
        Ok(grade::evaluate(&GradeInput {
            valid,
            receipt,
            context: context.as_ref(),
            decision: decision.as_ref(),
        })
        .grade)
    }

    /// Builds the pack zip for a stored receipt.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] when the receipt or its supporting
    /// records are missing, and [`ServiceError::Pack`] on malformed stored
    /// artifacts.
    pub fn pack(&self, receipt_id: &str, base_url: &str) -> Result<Vec<u8>, ServiceError> {
        let receipt = self
            .ledger
            .get_receipt(receipt_id)?
            .ok_or(ServiceError::NotFound("receipt"))?;
        let context = self
            .ledger
            .get_context(receipt.context_id.as_str())?
            .ok_or(ServiceError::NotFound("context"))?;
        let decision = self
            .ledger
            .get_decision(receipt.decision_id.as_str())?
            .ok_or(ServiceError::NotFound("decision"))?;
        let policy_row = self
            .ledger
            .get_policy_version(&receipt.policy_hash)?
            .ok_or(ServiceError::NotFound("policy"))?;

        let mut approvals = Vec::new();
        if let Some(approval_id) = &receipt.approval_id {
            if let Some(approval) = self.ledger.get_approval(approval_id.as_str())? {
                let idem_row = self.ledger.get_idem_key(approval.idem_key.as_str())?;
                let follow_up = idem_row
                    .and_then(|row| row.final_receipt_id.or(row.latest_receipt_id))
                    .unwrap_or_else(|| receipt.receipt_id.clone());
                approvals.push(ApprovalSummary {
                    approval_id: approval.approval_id,
                    status: approval.status.as_str().to_string(),
                    receipt_id: follow_up,
                });
            }
        }

        let valid = self.verify(receipt_id).map(|outcome| outcome.valid)?;

        let pack_bytes = build_zip(
            &PackInput {
                receipt,
                context_body: context.body_json,
                decision_body: decision.body_json,
                policy_yaml: policy_row.policy_yaml,
                approvals,
                valid,
                created_at: now_rfc3339(),
            },
            base_url,
        )?;
        Ok(pack_bytes)
    }

    /// Loads an approval together with its follow-up receipt identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Ledger`] when reads fail.
    pub fn approval_status(
        &self,
        approval_id: &str,
    ) -> Result<Option<(ApprovalRow, Option<ReceiptId>)>, ServiceError> {
        let Some(approval) = self.ledger.get_approval(approval_id)? else {
            return Ok(None);
        };
        let receipt_id = self
            .ledger
            .get_idem_key(approval.idem_key.as_str())?
            .and_then(|row| row.final_receipt_id.or(row.latest_receipt_id));
        Ok(Some((approval, receipt_id)))
    }
}

fn verify_error_kind(err: &VerifyError) -> &'static str {
    match err {
        VerifyError::DigestMismatch => "digest_mismatch",
        VerifyError::SignatureInvalid | VerifyError::MalformedSignature => "signature_invalid",
    }
}
