// relia-core/src/lib.rs
// ============================================================================
// Module: Relia Core Library
// Description: Public API surface for the Relia authorization core.
// Purpose: Expose canonical hashing, signing, records, policy, and interfaces.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Relia core provides the deterministic building blocks of the authorization
//! gateway: canonical JSON hashing, Ed25519 receipt signing, policy
//! evaluation, content-addressed records, the idempotency state machine, and
//! the ledger capability the storage backends implement. It is backend and
//! transport agnostic.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use self::core::canonical::CanonError;
pub use self::core::canonical::canonical_bytes;
pub use self::core::canonical::canonical_from;
pub use self::core::canonical::digest_bytes;
pub use self::core::canonical::digest_hex;
pub use self::core::canonical::digest_with_prefix;
pub use self::core::grade::GradeInput;
pub use self::core::grade::GradeResult;
pub use self::core::identifiers::ApprovalId;
pub use self::core::identifiers::ContextId;
pub use self::core::identifiers::DecisionId;
pub use self::core::identifiers::IdemKey;
pub use self::core::identifiers::KeyId;
pub use self::core::identifiers::ReceiptId;
pub use self::core::policy::LoadedPolicy;
pub use self::core::policy::Policy;
pub use self::core::policy::PolicyDecision;
pub use self::core::policy::PolicyDefaults;
pub use self::core::policy::PolicyError;
pub use self::core::policy::PolicyInput;
pub use self::core::policy::PolicyRule;
pub use self::core::policy::RuleEffect;
pub use self::core::policy::RuleMatch;
pub use self::core::policy::Verdict;
pub use self::core::receipt::MakeReceiptInput;
pub use self::core::receipt::OutcomeError;
pub use self::core::receipt::OutcomeStatus;
pub use self::core::receipt::ReceiptActor;
pub use self::core::receipt::ReceiptApproval;
pub use self::core::receipt::ReceiptApprover;
pub use self::core::receipt::ReceiptCredentialGrant;
pub use self::core::receipt::ReceiptError;
pub use self::core::receipt::ReceiptOutcome;
pub use self::core::receipt::ReceiptPolicy;
pub use self::core::receipt::ReceiptRequest;
pub use self::core::receipt::StoredReceipt;
pub use self::core::receipt::make_receipt;
pub use self::core::records::ContextEvidence;
pub use self::core::records::ContextInputs;
pub use self::core::records::ContextRecord;
pub use self::core::records::ContextSource;
pub use self::core::records::DecisionPolicy;
pub use self::core::records::DecisionRecord;
pub use self::core::records::RecordError;
pub use self::core::records::build_context;
pub use self::core::records::build_decision;
pub use self::core::signing::KeyError;
pub use self::core::signing::LocalSigner;
pub use self::core::signing::SignError;
pub use self::core::signing::Signer;
pub use self::core::signing::VerifyError;
pub use self::core::signing::load_signing_key;
pub use self::core::signing::verify_receipt;
pub use interfaces::ApprovalRow;
pub use interfaces::ApprovalStatus;
pub use interfaces::ContextRow;
pub use interfaces::DecisionRow;
pub use interfaces::IdemKeyRow;
pub use interfaces::KeyRow;
pub use interfaces::Ledger;
pub use interfaces::LedgerError;
pub use interfaces::LedgerTx;
pub use interfaces::OutboxRow;
pub use interfaces::OutboxStatus;
pub use interfaces::PolicyVersionRow;
pub use interfaces::ensure_json_body;
pub use runtime::memory::MemoryLedger;
pub use runtime::pack::ApprovalSummary;
pub use runtime::pack::PackError;
pub use runtime::pack::PackInput;
pub use runtime::pack::PackManifest;
pub use runtime::pack::PackSummary;
pub use runtime::pack::build_files;
pub use runtime::pack::build_summary;
pub use runtime::pack::build_zip;
pub use runtime::pack::write_zip;
pub use runtime::state::AuthorizePlan;
pub use runtime::state::IdemKeyInput;
pub use runtime::state::IdemStatus;
pub use runtime::state::NextAction;
pub use runtime::state::PlanError;
pub use runtime::state::compute_idem_key;
pub use runtime::state::determine_next_action;
pub use runtime::state::plan_authorize;
pub use runtime::state::transition_from_verdict;
