// relia-store-postgres/src/store.rs
// ============================================================================
// Module: Postgres Ledger Store
// Description: Durable Ledger backed by Postgres.
// Purpose: Persist receipts, approvals, and outbox rows transactionally.
// Dependencies: relia-core, postgres, thiserror
// ============================================================================

//! ## Overview
//! This module implements the [`Ledger`] capability over a Postgres
//! connection. The schema is applied on open; every `with_tx` call runs one
//! database transaction. Semantics mirror the `SQLite` backend:
//! insert-or-ignore for content-addressed rows, upsert for approvals,
//! idempotency keys, and outbox rows, and due-ordered outbox listing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use postgres::Client;
use postgres::NoTls;
use postgres::Row;
use postgres::Transaction;
use relia_core::ApprovalId;
use relia_core::ApprovalRow;
use relia_core::ApprovalStatus;
use relia_core::ContextId;
use relia_core::ContextRow;
use relia_core::DecisionId;
use relia_core::DecisionRow;
use relia_core::IdemKey;
use relia_core::IdemKeyRow;
use relia_core::KeyId;
use relia_core::KeyRow;
use relia_core::Ledger;
use relia_core::LedgerError;
use relia_core::LedgerTx;
use relia_core::OutboxRow;
use relia_core::OutboxStatus;
use relia_core::PolicyVersionRow;
use relia_core::ReceiptId;
use relia_core::StoredReceipt;
use relia_core::core::receipt::OutcomeStatus;
use relia_core::ensure_json_body;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Ledger schema, applied on open.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS relia_keys (
  key_id TEXT PRIMARY KEY,
  public_key BYTEA NOT NULL,
  created_at TEXT NOT NULL,
  rotated_at TEXT
);
CREATE TABLE IF NOT EXISTS relia_policy_versions (
  policy_hash TEXT PRIMARY KEY,
  policy_id TEXT NOT NULL,
  policy_version TEXT NOT NULL,
  policy_yaml BYTEA NOT NULL,
  created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS relia_contexts (
  context_id TEXT PRIMARY KEY,
  body_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS relia_decisions (
  decision_id TEXT PRIMARY KEY,
  context_id TEXT NOT NULL,
  policy_hash TEXT NOT NULL,
  verdict TEXT NOT NULL,
  body_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS relia_receipts (
  receipt_id TEXT PRIMARY KEY,
  idem_key TEXT NOT NULL,
  created_at TEXT NOT NULL,
  supersedes_receipt_id TEXT,
  context_id TEXT NOT NULL,
  decision_id TEXT NOT NULL,
  policy_hash TEXT NOT NULL,
  approval_id TEXT,
  outcome_status TEXT NOT NULL,
  final BOOLEAN NOT NULL,
  expires_at TEXT,
  body_json TEXT NOT NULL,
  body_digest TEXT NOT NULL,
  key_id TEXT NOT NULL,
  sig BYTEA NOT NULL
);
CREATE INDEX IF NOT EXISTS relia_receipts_idem_key ON relia_receipts(idem_key);
CREATE TABLE IF NOT EXISTS relia_approvals (
  approval_id TEXT PRIMARY KEY,
  idem_key TEXT NOT NULL,
  status TEXT NOT NULL,
  slack_channel TEXT,
  slack_msg_ts TEXT,
  approved_by TEXT,
  approved_at TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS relia_approvals_idem_key ON relia_approvals(idem_key);
CREATE TABLE IF NOT EXISTS relia_idempotency_keys (
  idem_key TEXT PRIMARY KEY,
  status TEXT NOT NULL,
  approval_id TEXT,
  latest_receipt_id TEXT,
  final_receipt_id TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  ttl_expires_at TEXT
);
CREATE TABLE IF NOT EXISTS relia_slack_outbox (
  notification_id TEXT PRIMARY KEY,
  approval_id TEXT NOT NULL,
  channel TEXT NOT NULL,
  message_json TEXT NOT NULL,
  status TEXT NOT NULL,
  attempt_count BIGINT NOT NULL,
  next_attempt_at TEXT NOT NULL,
  last_error TEXT,
  sent_at TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS relia_slack_outbox_due ON relia_slack_outbox(status, next_attempt_at);
";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Postgres ledger errors.
#[derive(Debug, Error)]
pub enum PostgresLedgerError {
    /// Connection failure.
    #[error("postgres ledger connect error: {0}")]
    Connect(String),
    /// Database engine failure.
    #[error("postgres ledger db error: {0}")]
    Db(String),
}

fn db_err(err: postgres::Error) -> LedgerError {
    LedgerError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Postgres-backed ledger.
#[derive(Clone)]
pub struct PostgresLedger {
    /// Shared client guarded by a mutex.
    client: Arc<Mutex<Client>>,
}

impl PostgresLedger {
    /// Connects to Postgres and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresLedgerError`] when the connection or schema
    /// application fails.
    pub fn connect(dsn: &str) -> Result<Self, PostgresLedgerError> {
        let mut client = Client::connect(dsn, NoTls)
            .map_err(|err| PostgresLedgerError::Connect(err.to_string()))?;
        client
            .batch_execute(SCHEMA)
            .map_err(|err| PostgresLedgerError::Db(err.to_string()))?;
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Client>, LedgerError> {
        self.client
            .lock()
            .map_err(|_| LedgerError::Db("client mutex poisoned".to_string()))
    }
}

impl Ledger for PostgresLedger {
    fn with_tx(
        &self,
        f: &mut dyn FnMut(&mut dyn LedgerTx) -> Result<(), LedgerError>,
    ) -> Result<(), LedgerError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_err)?;
        let mut wrapped = PgTx { tx };
        let result = f(&mut wrapped);
        let PgTx { tx } = wrapped;
        match result {
            Ok(()) => tx.commit().map_err(db_err),
            Err(err) => {
                let _ = tx.rollback();
                Err(err)
            }
        }
    }

    fn list_outbox_due(&self, now: &str, limit: usize) -> Result<Vec<OutboxRow>, LedgerError> {
        let limit = if limit == 0 { 100 } else { limit };
        let mut guard = self.lock()?;
        let rows = guard
            .query(
                "SELECT notification_id, approval_id, channel, message_json, status, \
                 attempt_count, next_attempt_at, last_error, sent_at, created_at, updated_at \
                 FROM relia_slack_outbox \
                 WHERE status = 'pending' AND next_attempt_at <= $1 \
                 ORDER BY created_at ASC \
                 LIMIT $2",
                &[&now, &(limit as i64)],
            )
            .map_err(db_err)?;

        rows.iter().map(outbox_from_row).collect()
    }
}

// ============================================================================
// SECTION: Transaction
// ============================================================================

struct PgTx<'a> {
    tx: Transaction<'a>,
}

impl LedgerTx for PgTx<'_> {
    fn put_key(&mut self, row: &KeyRow) -> Result<(), LedgerError> {
        self.tx
            .execute(
                "INSERT INTO relia_keys(key_id, public_key, created_at, rotated_at) \
                 VALUES($1, $2, $3, $4) \
                 ON CONFLICT(key_id) DO NOTHING",
                &[
                    &row.key_id.as_str(),
                    &row.public_key,
                    &row.created_at,
                    &row.rotated_at,
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_key(&mut self, key_id: &str) -> Result<Option<KeyRow>, LedgerError> {
        self.tx
            .query_opt(
                "SELECT key_id, public_key, created_at, rotated_at FROM relia_keys WHERE key_id = $1",
                &[&key_id],
            )
            .map_err(db_err)?
            .map(|row| {
                Ok(KeyRow {
                    key_id: KeyId::new(row.get::<_, String>(0)),
                    public_key: row.get(1),
                    created_at: row.get(2),
                    rotated_at: row.get(3),
                })
            })
            .transpose()
    }

    fn put_outbox(&mut self, row: &OutboxRow) -> Result<(), LedgerError> {
        let message = String::from_utf8_lossy(&row.message_json).into_owned();
        self.tx
            .execute(
                "INSERT INTO relia_slack_outbox(notification_id, approval_id, channel, \
                 message_json, status, attempt_count, next_attempt_at, last_error, sent_at, \
                 created_at, updated_at) \
                 VALUES($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT(notification_id) DO UPDATE SET \
                 status = excluded.status, \
                 attempt_count = excluded.attempt_count, \
                 next_attempt_at = excluded.next_attempt_at, \
                 last_error = excluded.last_error, \
                 sent_at = excluded.sent_at, \
                 updated_at = excluded.updated_at",
                &[
                    &row.notification_id,
                    &row.approval_id.as_str(),
                    &row.channel,
                    &message,
                    &row.status.as_str(),
                    &row.attempt_count,
                    &row.next_attempt_at,
                    &row.last_error,
                    &row.sent_at,
                    &row.created_at,
                    &row.updated_at,
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_outbox(&mut self, notification_id: &str) -> Result<Option<OutboxRow>, LedgerError> {
        self.tx
            .query_opt(
                "SELECT notification_id, approval_id, channel, message_json, status, \
                 attempt_count, next_attempt_at, last_error, sent_at, created_at, updated_at \
                 FROM relia_slack_outbox WHERE notification_id = $1",
                &[&notification_id],
            )
            .map_err(db_err)?
            .map(|row| outbox_from_row(&row))
            .transpose()
    }

    fn put_policy_version(&mut self, row: &PolicyVersionRow) -> Result<(), LedgerError> {
        self.tx
            .execute(
                "INSERT INTO relia_policy_versions(policy_hash, policy_id, policy_version, \
                 policy_yaml, created_at) \
                 VALUES($1, $2, $3, $4, $5) \
                 ON CONFLICT(policy_hash) DO NOTHING",
                &[
                    &row.policy_hash,
                    &row.policy_id,
                    &row.policy_version,
                    &row.policy_yaml,
                    &row.created_at,
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_policy_version(
        &mut self,
        policy_hash: &str,
    ) -> Result<Option<PolicyVersionRow>, LedgerError> {
        self.tx
            .query_opt(
                "SELECT policy_hash, policy_id, policy_version, policy_yaml, created_at \
                 FROM relia_policy_versions WHERE policy_hash = $1",
                &[&policy_hash],
            )
            .map_err(db_err)?
            .map(|row| {
                Ok(PolicyVersionRow {
                    policy_hash: row.get(0),
                    policy_id: row.get(1),
                    policy_version: row.get(2),
                    policy_yaml: row.get(3),
                    created_at: row.get(4),
                })
            })
            .transpose()
    }

    fn put_context(&mut self, row: &ContextRow) -> Result<(), LedgerError> {
        ensure_json_body(&row.body_json)?;
        let body = String::from_utf8_lossy(&row.body_json).into_owned();
        self.tx
            .execute(
                "INSERT INTO relia_contexts(context_id, body_json, created_at) \
                 VALUES($1, $2, $3) \
                 ON CONFLICT(context_id) DO NOTHING",
                &[&row.context_id.as_str(), &body, &row.created_at],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_context(&mut self, context_id: &str) -> Result<Option<ContextRow>, LedgerError> {
        self.tx
            .query_opt(
                "SELECT context_id, body_json, created_at FROM relia_contexts WHERE context_id = $1",
                &[&context_id],
            )
            .map_err(db_err)?
            .map(|row| {
                Ok(ContextRow {
                    context_id: ContextId::new(row.get::<_, String>(0)),
                    body_json: row.get::<_, String>(1).into_bytes(),
                    created_at: row.get(2),
                })
            })
            .transpose()
    }

    fn put_decision(&mut self, row: &DecisionRow) -> Result<(), LedgerError> {
        ensure_json_body(&row.body_json)?;
        let body = String::from_utf8_lossy(&row.body_json).into_owned();
        self.tx
            .execute(
                "INSERT INTO relia_decisions(decision_id, context_id, policy_hash, verdict, \
                 body_json, created_at) \
                 VALUES($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT(decision_id) DO NOTHING",
                &[
                    &row.decision_id.as_str(),
                    &row.context_id.as_str(),
                    &row.policy_hash,
                    &row.verdict,
                    &body,
                    &row.created_at,
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_decision(&mut self, decision_id: &str) -> Result<Option<DecisionRow>, LedgerError> {
        self.tx
            .query_opt(
                "SELECT decision_id, context_id, policy_hash, verdict, body_json, created_at \
                 FROM relia_decisions WHERE decision_id = $1",
                &[&decision_id],
            )
            .map_err(db_err)?
            .map(|row| {
                Ok(DecisionRow {
                    decision_id: DecisionId::new(row.get::<_, String>(0)),
                    context_id: ContextId::new(row.get::<_, String>(1)),
                    policy_hash: row.get(2),
                    verdict: row.get(3),
                    body_json: row.get::<_, String>(4).into_bytes(),
                    created_at: row.get(5),
                })
            })
            .transpose()
    }

    fn put_receipt(&mut self, receipt: &StoredReceipt) -> Result<(), LedgerError> {
        if receipt.receipt_id.is_empty() {
            return Err(LedgerError::Invalid("missing receipt_id".to_string()));
        }
        ensure_json_body(&receipt.body_json)?;
        let body = String::from_utf8_lossy(&receipt.body_json).into_owned();
        self.tx
            .execute(
                "INSERT INTO relia_receipts(receipt_id, idem_key, created_at, \
                 supersedes_receipt_id, context_id, decision_id, policy_hash, approval_id, \
                 outcome_status, final, expires_at, body_json, body_digest, key_id, sig) \
                 VALUES($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
                 ON CONFLICT(receipt_id) DO NOTHING",
                &[
                    &receipt.receipt_id.as_str(),
                    &receipt.idem_key.as_str(),
                    &receipt.created_at,
                    &receipt.supersedes_receipt_id.as_ref().map(ReceiptId::as_str),
                    &receipt.context_id.as_str(),
                    &receipt.decision_id.as_str(),
                    &receipt.policy_hash,
                    &receipt.approval_id.as_ref().map(ApprovalId::as_str),
                    &receipt.outcome_status.as_str(),
                    &receipt.is_final,
                    &receipt.expires_at,
                    &body,
                    &receipt.body_digest,
                    &receipt.key_id.as_str(),
                    &receipt.sig,
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_receipt(&mut self, receipt_id: &str) -> Result<Option<StoredReceipt>, LedgerError> {
        self.tx
            .query_opt(
                "SELECT receipt_id, idem_key, created_at, supersedes_receipt_id, context_id, \
                 decision_id, policy_hash, approval_id, outcome_status, final, expires_at, \
                 body_json, body_digest, key_id, sig \
                 FROM relia_receipts WHERE receipt_id = $1",
                &[&receipt_id],
            )
            .map_err(db_err)?
            .map(|row| receipt_from_row(&row))
            .transpose()
    }

    fn put_approval(&mut self, row: &ApprovalRow) -> Result<(), LedgerError> {
        self.tx
            .execute(
                "INSERT INTO relia_approvals(approval_id, idem_key, status, slack_channel, \
                 slack_msg_ts, approved_by, approved_at, created_at, updated_at) \
                 VALUES($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT(approval_id) DO UPDATE SET \
                 status = excluded.status, \
                 slack_channel = COALESCE(excluded.slack_channel, relia_approvals.slack_channel), \
                 slack_msg_ts = COALESCE(excluded.slack_msg_ts, relia_approvals.slack_msg_ts), \
                 approved_by = COALESCE(excluded.approved_by, relia_approvals.approved_by), \
                 approved_at = COALESCE(excluded.approved_at, relia_approvals.approved_at), \
                 updated_at = excluded.updated_at",
                &[
                    &row.approval_id.as_str(),
                    &row.idem_key.as_str(),
                    &row.status.as_str(),
                    &row.slack_channel,
                    &row.slack_msg_ts,
                    &row.approved_by,
                    &row.approved_at,
                    &row.created_at,
                    &row.updated_at,
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_approval(&mut self, approval_id: &str) -> Result<Option<ApprovalRow>, LedgerError> {
        self.tx
            .query_opt(
                "SELECT approval_id, idem_key, status, slack_channel, slack_msg_ts, approved_by, \
                 approved_at, created_at, updated_at \
                 FROM relia_approvals WHERE approval_id = $1",
                &[&approval_id],
            )
            .map_err(db_err)?
            .map(|row| approval_from_row(&row))
            .transpose()
    }

    fn get_approval_by_idem_key(
        &mut self,
        idem_key: &str,
    ) -> Result<Option<ApprovalRow>, LedgerError> {
        self.tx
            .query_opt(
                "SELECT approval_id, idem_key, status, slack_channel, slack_msg_ts, approved_by, \
                 approved_at, created_at, updated_at \
                 FROM relia_approvals WHERE idem_key = $1",
                &[&idem_key],
            )
            .map_err(db_err)?
            .map(|row| approval_from_row(&row))
            .transpose()
    }

    fn put_idem_key(&mut self, row: &IdemKeyRow) -> Result<(), LedgerError> {
        self.tx
            .execute(
                "INSERT INTO relia_idempotency_keys(idem_key, status, approval_id, \
                 latest_receipt_id, final_receipt_id, created_at, updated_at, ttl_expires_at) \
                 VALUES($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT(idem_key) DO UPDATE SET \
                 status = excluded.status, \
                 approval_id = excluded.approval_id, \
                 latest_receipt_id = excluded.latest_receipt_id, \
                 final_receipt_id = excluded.final_receipt_id, \
                 updated_at = excluded.updated_at, \
                 ttl_expires_at = excluded.ttl_expires_at",
                &[
                    &row.idem_key.as_str(),
                    &row.status,
                    &row.approval_id.as_ref().map(ApprovalId::as_str),
                    &row.latest_receipt_id.as_ref().map(ReceiptId::as_str),
                    &row.final_receipt_id.as_ref().map(ReceiptId::as_str),
                    &row.created_at,
                    &row.updated_at,
                    &row.ttl_expires_at,
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_idem_key(&mut self, idem_key: &str) -> Result<Option<IdemKeyRow>, LedgerError> {
        self.tx
            .query_opt(
                "SELECT idem_key, status, approval_id, latest_receipt_id, final_receipt_id, \
                 created_at, updated_at, ttl_expires_at \
                 FROM relia_idempotency_keys WHERE idem_key = $1",
                &[&idem_key],
            )
            .map_err(db_err)?
            .map(|row| {
                Ok(IdemKeyRow {
                    idem_key: IdemKey::new(row.get::<_, String>(0)),
                    status: row.get(1),
                    approval_id: row.get::<_, Option<String>>(2).map(ApprovalId::new),
                    latest_receipt_id: row.get::<_, Option<String>>(3).map(ReceiptId::new),
                    final_receipt_id: row.get::<_, Option<String>>(4).map(ReceiptId::new),
                    created_at: row.get(5),
                    updated_at: row.get(6),
                    ttl_expires_at: row.get(7),
                })
            })
            .transpose()
    }
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

fn outbox_from_row(row: &Row) -> Result<OutboxRow, LedgerError> {
    let status_text: String = row.get(4);
    let status = OutboxStatus::parse(&status_text)
        .ok_or_else(|| LedgerError::Corrupt(format!("unknown outbox status: {status_text}")))?;
    Ok(OutboxRow {
        notification_id: row.get(0),
        approval_id: ApprovalId::new(row.get::<_, String>(1)),
        channel: row.get(2),
        message_json: row.get::<_, String>(3).into_bytes(),
        status,
        attempt_count: row.get(5),
        next_attempt_at: row.get(6),
        last_error: row.get(7),
        sent_at: row.get(8),
        created_at: row.get(9),
        updated_at: row.get(10),
    })
}

fn approval_from_row(row: &Row) -> Result<ApprovalRow, LedgerError> {
    let status_text: String = row.get(2);
    let status = ApprovalStatus::parse(&status_text)
        .ok_or_else(|| LedgerError::Corrupt(format!("unknown approval status: {status_text}")))?;
    Ok(ApprovalRow {
        approval_id: ApprovalId::new(row.get::<_, String>(0)),
        idem_key: IdemKey::new(row.get::<_, String>(1)),
        status,
        slack_channel: row.get(3),
        slack_msg_ts: row.get(4),
        approved_by: row.get(5),
        approved_at: row.get(6),
        created_at: row.get(7),
        updated_at: row.get(8),
    })
}

fn receipt_from_row(row: &Row) -> Result<StoredReceipt, LedgerError> {
    let status_text: String = row.get(8);
    let outcome_status = OutcomeStatus::parse(&status_text)
        .ok_or_else(|| LedgerError::Corrupt(format!("unknown outcome status: {status_text}")))?;
    Ok(StoredReceipt {
        receipt_id: ReceiptId::new(row.get::<_, String>(0)),
        idem_key: IdemKey::new(row.get::<_, String>(1)),
        created_at: row.get(2),
        supersedes_receipt_id: row.get::<_, Option<String>>(3).map(ReceiptId::new),
        context_id: ContextId::new(row.get::<_, String>(4)),
        decision_id: DecisionId::new(row.get::<_, String>(5)),
        policy_hash: row.get(6),
        approval_id: row.get::<_, Option<String>>(7).map(ApprovalId::new),
        outcome_status,
        is_final: row.get(9),
        expires_at: row.get(10),
        body_json: row.get::<_, String>(11).into_bytes(),
        body_digest: row.get(12),
        key_id: KeyId::new(row.get::<_, String>(13)),
        sig: row.get(14),
    })
}
