// relia-core/src/interfaces/mod.rs
// ============================================================================
// Module: Relia Ledger Interfaces
// Description: Backend-agnostic ledger capability and persisted row types.
// Purpose: Define the transactional contract storage backends implement.
// Dependencies: serde, serde_json, crate::core
// ============================================================================

//! ## Overview
//! The ledger is the only durable state in the gateway. Backends implement
//! [`Ledger`] and [`LedgerTx`]; the authorize flow drives every state
//! transition through `with_tx` so that a transition either commits whole or
//! not at all. Content-addressed rows are insert-or-ignore; approvals,
//! idempotency keys, and outbox rows are upserts. Bodies are canonical JSON
//! and backends must refuse bytes that do not parse.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::ApprovalId;
use crate::core::identifiers::ContextId;
use crate::core::identifiers::DecisionId;
use crate::core::identifiers::IdemKey;
use crate::core::identifiers::KeyId;
use crate::core::identifiers::ReceiptId;
use crate::core::receipt::StoredReceipt;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by ledger backends.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Backend I/O failure.
    #[error("ledger io error: {0}")]
    Io(String),
    /// Database engine failure.
    #[error("ledger db error: {0}")]
    Db(String),
    /// Stored data failed an integrity check.
    #[error("ledger corruption: {0}")]
    Corrupt(String),
    /// A write was rejected as invalid.
    #[error("ledger invalid data: {0}")]
    Invalid(String),
}

/// Validates that body bytes are well-formed JSON before persisting.
///
/// # Errors
///
/// Returns [`LedgerError::Invalid`] when the bytes do not parse.
pub fn ensure_json_body(bytes: &[u8]) -> Result<(), LedgerError> {
    serde_json::from_slice::<serde::de::IgnoredAny>(bytes)
        .map(|_| ())
        .map_err(|err| LedgerError::Invalid(format!("body is not valid json: {err}")))
}

// ============================================================================
// SECTION: Statuses
// ============================================================================

/// Lifecycle of a human approval. Transitions are monotonic:
/// `pending -> {approved | denied}` and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting on an approver.
    Pending,
    /// Approved.
    Approved,
    /// Denied.
    Denied,
}

impl ApprovalStatus {
    /// Returns the persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

/// Delivery state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Awaiting delivery.
    Pending,
    /// Delivered (or terminated as a poison pill).
    Sent,
}

impl OutboxStatus {
    /// Returns the persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Registered signing key; private material never reaches the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRow {
    /// Key identifier.
    pub key_id: KeyId,
    /// Ed25519 public key bytes.
    pub public_key: Vec<u8>,
    /// Registration timestamp.
    pub created_at: String,
    /// Rotation timestamp, once rotated out.
    pub rotated_at: Option<String>,
}

/// Snapshot of one policy version, keyed by its raw-byte hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVersionRow {
    /// Digest of the raw YAML bytes.
    pub policy_hash: String,
    /// Policy identifier.
    pub policy_id: String,
    /// Policy version label.
    pub policy_version: String,
    /// Raw YAML bytes as hashed.
    pub policy_yaml: Vec<u8>,
    /// Snapshot timestamp.
    pub created_at: String,
}

/// Persisted context record bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRow {
    /// Content-addressed identifier.
    pub context_id: ContextId,
    /// Canonical body bytes.
    pub body_json: Vec<u8>,
    /// Creation timestamp.
    pub created_at: String,
}

/// Persisted decision record bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRow {
    /// Content-addressed identifier.
    pub decision_id: DecisionId,
    /// Context the decision was made for.
    pub context_id: ContextId,
    /// Policy hash the decision was made under.
    pub policy_hash: String,
    /// Verdict string.
    pub verdict: String,
    /// Canonical body bytes.
    pub body_json: Vec<u8>,
    /// Creation timestamp.
    pub created_at: String,
}

/// Persisted approval state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRow {
    /// Approval identifier.
    pub approval_id: ApprovalId,
    /// Idempotency key the approval belongs to.
    pub idem_key: IdemKey,
    /// Lifecycle status.
    pub status: ApprovalStatus,
    /// Chat channel the notification was posted to.
    pub slack_channel: Option<String>,
    /// Chat message timestamp once posted.
    pub slack_msg_ts: Option<String>,
    /// Approver identity once finalized.
    pub approved_by: Option<String>,
    /// Finalization timestamp.
    pub approved_at: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Persisted idempotency key state.
///
/// `status` stays a plain string so that unknown values observed in storage
/// surface as `unsupported state` instead of failing the read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdemKeyRow {
    /// Idempotency key.
    pub idem_key: IdemKey,
    /// Current status string.
    pub status: String,
    /// Linked approval, when one exists.
    pub approval_id: Option<ApprovalId>,
    /// Most recent receipt in the chain.
    pub latest_receipt_id: Option<ReceiptId>,
    /// Terminal receipt; set at most once.
    pub final_receipt_id: Option<ReceiptId>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
    /// Expiry of the cached outcome, when bounded.
    pub ttl_expires_at: Option<String>,
}

/// Pending chat notification row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRow {
    /// Notification identifier, scoped to the approval.
    pub notification_id: String,
    /// Approval the notification belongs to.
    pub approval_id: ApprovalId,
    /// Target chat channel.
    pub channel: String,
    /// Serialized message payload.
    pub message_json: Vec<u8>,
    /// Delivery status.
    pub status: OutboxStatus,
    /// Delivery attempts so far.
    pub attempt_count: i64,
    /// Earliest next delivery attempt.
    pub next_attempt_at: String,
    /// Last delivery error.
    pub last_error: Option<String>,
    /// Delivery timestamp once sent.
    pub sent_at: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

// ============================================================================
// SECTION: Ledger Capability
// ============================================================================

/// Operations available inside one ledger transaction.
///
/// Reads observe writes made earlier in the same transaction.
pub trait LedgerTx {
    /// Registers a signing key (insert-or-ignore).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_key(&mut self, row: &KeyRow) -> Result<(), LedgerError>;

    /// Loads a signing key by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_key(&mut self, key_id: &str) -> Result<Option<KeyRow>, LedgerError>;

    /// Upserts an outbox row.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_outbox(&mut self, row: &OutboxRow) -> Result<(), LedgerError>;

    /// Loads an outbox row by notification identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_outbox(&mut self, notification_id: &str) -> Result<Option<OutboxRow>, LedgerError>;

    /// Snapshots a policy version (insert-or-ignore on the hash).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_policy_version(&mut self, row: &PolicyVersionRow) -> Result<(), LedgerError>;

    /// Loads a policy version by hash.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_policy_version(
        &mut self,
        policy_hash: &str,
    ) -> Result<Option<PolicyVersionRow>, LedgerError>;

    /// Persists context bytes (insert-or-ignore; body must be valid JSON).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Invalid`] on malformed bodies and
    /// [`LedgerError`] when the write fails.
    fn put_context(&mut self, row: &ContextRow) -> Result<(), LedgerError>;

    /// Loads context bytes by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_context(&mut self, context_id: &str) -> Result<Option<ContextRow>, LedgerError>;

    /// Persists decision bytes (insert-or-ignore; body must be valid JSON).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Invalid`] on malformed bodies and
    /// [`LedgerError`] when the write fails.
    fn put_decision(&mut self, row: &DecisionRow) -> Result<(), LedgerError>;

    /// Loads decision bytes by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_decision(&mut self, decision_id: &str) -> Result<Option<DecisionRow>, LedgerError>;

    /// Persists a signed receipt (insert-or-ignore; body must be valid JSON).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Invalid`] on malformed bodies and
    /// [`LedgerError`] when the write fails.
    fn put_receipt(&mut self, receipt: &StoredReceipt) -> Result<(), LedgerError>;

    /// Loads a receipt by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_receipt(&mut self, receipt_id: &str) -> Result<Option<StoredReceipt>, LedgerError>;

    /// Upserts an approval.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_approval(&mut self, row: &ApprovalRow) -> Result<(), LedgerError>;

    /// Loads an approval by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_approval(&mut self, approval_id: &str) -> Result<Option<ApprovalRow>, LedgerError>;

    /// Loads the approval linked to an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_approval_by_idem_key(
        &mut self,
        idem_key: &str,
    ) -> Result<Option<ApprovalRow>, LedgerError>;

    /// Upserts an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_idem_key(&mut self, row: &IdemKeyRow) -> Result<(), LedgerError>;

    /// Loads an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_idem_key(&mut self, idem_key: &str) -> Result<Option<IdemKeyRow>, LedgerError>;
}

/// Transactional ledger capability.
pub trait Ledger: Send + Sync {
    /// Runs the callback inside one transaction; commits on `Ok`, rolls back
    /// on `Err`.
    ///
    /// # Errors
    ///
    /// Returns the callback error, or [`LedgerError`] when the transaction
    /// itself fails.
    fn with_tx(
        &self,
        f: &mut dyn FnMut(&mut dyn LedgerTx) -> Result<(), LedgerError>,
    ) -> Result<(), LedgerError>;

    /// Lists pending outbox rows due at `now`, oldest first, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the query fails.
    fn list_outbox_due(&self, now: &str, limit: usize) -> Result<Vec<OutboxRow>, LedgerError>;

    /// Registers a signing key outside a broader transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_key(&self, row: &KeyRow) -> Result<(), LedgerError> {
        self.with_tx(&mut |tx| tx.put_key(row))
    }

    /// Loads a signing key by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_key(&self, key_id: &str) -> Result<Option<KeyRow>, LedgerError> {
        read_one(self, |tx| tx.get_key(key_id))
    }

    /// Upserts an outbox row outside a broader transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_outbox(&self, row: &OutboxRow) -> Result<(), LedgerError> {
        self.with_tx(&mut |tx| tx.put_outbox(row))
    }

    /// Loads an outbox row by notification identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_outbox(&self, notification_id: &str) -> Result<Option<OutboxRow>, LedgerError> {
        read_one(self, |tx| tx.get_outbox(notification_id))
    }

    /// Snapshots a policy version outside a broader transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_policy_version(&self, row: &PolicyVersionRow) -> Result<(), LedgerError> {
        self.with_tx(&mut |tx| tx.put_policy_version(row))
    }

    /// Loads a policy version by hash.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_policy_version(&self, policy_hash: &str) -> Result<Option<PolicyVersionRow>, LedgerError> {
        read_one(self, |tx| tx.get_policy_version(policy_hash))
    }

    /// Persists context bytes outside a broader transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_context(&self, row: &ContextRow) -> Result<(), LedgerError> {
        self.with_tx(&mut |tx| tx.put_context(row))
    }

    /// Loads context bytes by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_context(&self, context_id: &str) -> Result<Option<ContextRow>, LedgerError> {
        read_one(self, |tx| tx.get_context(context_id))
    }

    /// Persists decision bytes outside a broader transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_decision(&self, row: &DecisionRow) -> Result<(), LedgerError> {
        self.with_tx(&mut |tx| tx.put_decision(row))
    }

    /// Loads decision bytes by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_decision(&self, decision_id: &str) -> Result<Option<DecisionRow>, LedgerError> {
        read_one(self, |tx| tx.get_decision(decision_id))
    }

    /// Persists a signed receipt outside a broader transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_receipt(&self, receipt: &StoredReceipt) -> Result<(), LedgerError> {
        self.with_tx(&mut |tx| tx.put_receipt(receipt))
    }

    /// Loads a receipt by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_receipt(&self, receipt_id: &str) -> Result<Option<StoredReceipt>, LedgerError> {
        read_one(self, |tx| tx.get_receipt(receipt_id))
    }

    /// Upserts an approval outside a broader transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_approval(&self, row: &ApprovalRow) -> Result<(), LedgerError> {
        self.with_tx(&mut |tx| tx.put_approval(row))
    }

    /// Loads an approval by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_approval(&self, approval_id: &str) -> Result<Option<ApprovalRow>, LedgerError> {
        read_one(self, |tx| tx.get_approval(approval_id))
    }

    /// Loads the approval linked to an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_approval_by_idem_key(&self, idem_key: &str) -> Result<Option<ApprovalRow>, LedgerError> {
        read_one(self, |tx| tx.get_approval_by_idem_key(idem_key))
    }

    /// Upserts an idempotency key outside a broader transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the write fails.
    fn put_idem_key(&self, row: &IdemKeyRow) -> Result<(), LedgerError> {
        self.with_tx(&mut |tx| tx.put_idem_key(row))
    }

    /// Loads an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the read fails.
    fn get_idem_key(&self, idem_key: &str) -> Result<Option<IdemKeyRow>, LedgerError> {
        read_one(self, |tx| tx.get_idem_key(idem_key))
    }
}

fn read_one<L, T>(
    ledger: &L,
    mut read: impl FnMut(&mut dyn LedgerTx) -> Result<Option<T>, LedgerError>,
) -> Result<Option<T>, LedgerError>
where
    L: Ledger + ?Sized,
{
    let mut out = None;
    ledger.with_tx(&mut |tx| {
        out = read(tx)?;
        Ok(())
    })?;
    Ok(out)
}
