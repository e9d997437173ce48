// relia-core/src/runtime/memory.rs
// ============================================================================
// Module: Relia In-Memory Ledger
// Description: Map-backed ledger for tests and dev mode.
// Purpose: Provide the full ledger contract without a database.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! The in-memory ledger mirrors the durable backends' observable semantics:
//! content-addressed rows are insert-or-ignore, approvals and idempotency
//! keys are upserts, and outbox listing is due-ordered. Transactions here do
//! not roll back partial writes on error; the durable backends are the ones
//! exercised for atomicity.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::receipt::StoredReceipt;
use crate::interfaces::ApprovalRow;
use crate::interfaces::ContextRow;
use crate::interfaces::DecisionRow;
use crate::interfaces::IdemKeyRow;
use crate::interfaces::KeyRow;
use crate::interfaces::Ledger;
use crate::interfaces::LedgerError;
use crate::interfaces::LedgerTx;
use crate::interfaces::OutboxRow;
use crate::interfaces::OutboxStatus;
use crate::interfaces::PolicyVersionRow;
use crate::interfaces::ensure_json_body;

// ============================================================================
// SECTION: Store
// ============================================================================

/// Map-backed ledger.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    keys: HashMap<String, KeyRow>,
    outbox: HashMap<String, OutboxRow>,
    policies: HashMap<String, PolicyVersionRow>,
    contexts: HashMap<String, ContextRow>,
    decisions: HashMap<String, DecisionRow>,
    receipts: HashMap<String, StoredReceipt>,
    approvals: HashMap<String, ApprovalRow>,
    idem_keys: HashMap<String, IdemKeyRow>,
}

impl MemoryLedger {
    /// Creates an empty in-memory ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, LedgerError> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Db("ledger mutex poisoned".to_string()))
    }
}

impl Ledger for MemoryLedger {
    fn with_tx(
        &self,
        f: &mut dyn FnMut(&mut dyn LedgerTx) -> Result<(), LedgerError>,
    ) -> Result<(), LedgerError> {
        let mut guard = self.lock()?;
        f(&mut *guard)
    }

    fn list_outbox_due(&self, now: &str, limit: usize) -> Result<Vec<OutboxRow>, LedgerError> {
        let guard = self.lock()?;
        let mut due: Vec<OutboxRow> = guard
            .outbox
            .values()
            .filter(|row| row.status == OutboxStatus::Pending && row.next_attempt_at.as_str() <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        due.truncate(limit);
        Ok(due)
    }
}

impl LedgerTx for Inner {
    fn put_key(&mut self, row: &KeyRow) -> Result<(), LedgerError> {
        self.keys
            .entry(row.key_id.as_str().to_string())
            .or_insert_with(|| row.clone());
        Ok(())
    }

    fn get_key(&mut self, key_id: &str) -> Result<Option<KeyRow>, LedgerError> {
        Ok(self.keys.get(key_id).cloned())
    }

    fn put_outbox(&mut self, row: &OutboxRow) -> Result<(), LedgerError> {
        self.outbox
            .insert(row.notification_id.clone(), row.clone());
        Ok(())
    }

    fn get_outbox(&mut self, notification_id: &str) -> Result<Option<OutboxRow>, LedgerError> {
        Ok(self.outbox.get(notification_id).cloned())
    }

    fn put_policy_version(&mut self, row: &PolicyVersionRow) -> Result<(), LedgerError> {
        self.policies
            .entry(row.policy_hash.clone())
            .or_insert_with(|| row.clone());
        Ok(())
    }

    fn get_policy_version(
        &mut self,
        policy_hash: &str,
    ) -> Result<Option<PolicyVersionRow>, LedgerError> {
        Ok(self.policies.get(policy_hash).cloned())
    }

    fn put_context(&mut self, row: &ContextRow) -> Result<(), LedgerError> {
        ensure_json_body(&row.body_json)?;
        self.contexts
            .insert(row.context_id.as_str().to_string(), row.clone());
        Ok(())
    }

    fn get_context(&mut self, context_id: &str) -> Result<Option<ContextRow>, LedgerError> {
        Ok(self.contexts.get(context_id).cloned())
    }

    fn put_decision(&mut self, row: &DecisionRow) -> Result<(), LedgerError> {
        ensure_json_body(&row.body_json)?;
        self.decisions
            .insert(row.decision_id.as_str().to_string(), row.clone());
        Ok(())
    }

    fn get_decision(&mut self, decision_id: &str) -> Result<Option<DecisionRow>, LedgerError> {
        Ok(self.decisions.get(decision_id).cloned())
    }

    fn put_receipt(&mut self, receipt: &StoredReceipt) -> Result<(), LedgerError> {
        if receipt.receipt_id.is_empty() {
            return Err(LedgerError::Invalid("missing receipt_id".to_string()));
        }
        ensure_json_body(&receipt.body_json)?;
        self.receipts
            .entry(receipt.receipt_id.as_str().to_string())
            .or_insert_with(|| receipt.clone());
        Ok(())
    }

    fn get_receipt(&mut self, receipt_id: &str) -> Result<Option<StoredReceipt>, LedgerError> {
        Ok(self.receipts.get(receipt_id).cloned())
    }

    fn put_approval(&mut self, row: &ApprovalRow) -> Result<(), LedgerError> {
        self.approvals
            .insert(row.approval_id.as_str().to_string(), row.clone());
        Ok(())
    }

    fn get_approval(&mut self, approval_id: &str) -> Result<Option<ApprovalRow>, LedgerError> {
        Ok(self.approvals.get(approval_id).cloned())
    }

    fn get_approval_by_idem_key(
        &mut self,
        idem_key: &str,
    ) -> Result<Option<ApprovalRow>, LedgerError> {
        Ok(self
            .approvals
            .values()
            .find(|row| row.idem_key.as_str() == idem_key)
            .cloned())
    }

    fn put_idem_key(&mut self, row: &IdemKeyRow) -> Result<(), LedgerError> {
        self.idem_keys
            .insert(row.idem_key.as_str().to_string(), row.clone());
        Ok(())
    }

    fn get_idem_key(&mut self, idem_key: &str) -> Result<Option<IdemKeyRow>, LedgerError> {
        Ok(self.idem_keys.get(idem_key).cloned())
    }
}
