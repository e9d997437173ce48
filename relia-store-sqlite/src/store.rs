// relia-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Ledger Store
// Description: Durable Ledger backed by SQLite WAL.
// Purpose: Persist receipts, approvals, and outbox rows transactionally.
// Dependencies: relia-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! This module implements the [`Ledger`] capability over a single `SQLite`
//! file. The schema is applied on open; the connection is shared behind a
//! mutex and every `with_tx` call runs one `SQLite` transaction, so the
//! authorize flow's plan-then-commit transitions are atomic. Database
//! contents are untrusted: status strings and body bytes are validated on
//! read and write.

// ============================================================================//
// SECTION: Imports
// ============================================================================//

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

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
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::Transaction;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================//
// SECTION: Constants
// ============================================================================//

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Ledger schema, applied on open.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS keys (
  key_id TEXT PRIMARY KEY,
  public_key BLOB NOT NULL,
  created_at TEXT NOT NULL,
  rotated_at TEXT
);
CREATE TABLE IF NOT EXISTS policy_versions (
  policy_hash TEXT PRIMARY KEY,
  policy_id TEXT NOT NULL,
  policy_version TEXT NOT NULL,
  policy_yaml BLOB NOT NULL,
  created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS contexts (
  context_id TEXT PRIMARY KEY,
  body_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS decisions (
  decision_id TEXT PRIMARY KEY,
  context_id TEXT NOT NULL,
  policy_hash TEXT NOT NULL,
  verdict TEXT NOT NULL,
  body_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS receipts (
  receipt_id TEXT PRIMARY KEY,
  idem_key TEXT NOT NULL,
  created_at TEXT NOT NULL,
  supersedes_receipt_id TEXT,
  context_id TEXT NOT NULL,
  decision_id TEXT NOT NULL,
  policy_hash TEXT NOT NULL,
  approval_id TEXT,
  outcome_status TEXT NOT NULL,
  final INTEGER NOT NULL,
  expires_at TEXT,
  body_json TEXT NOT NULL,
  body_digest TEXT NOT NULL,
  key_id TEXT NOT NULL,
  sig BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS receipts_idem_key ON receipts(idem_key);
CREATE TABLE IF NOT EXISTS approvals (
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
CREATE INDEX IF NOT EXISTS approvals_idem_key ON approvals(idem_key);
CREATE TABLE IF NOT EXISTS idempotency_keys (
  idem_key TEXT PRIMARY KEY,
  status TEXT NOT NULL,
  approval_id TEXT,
  latest_receipt_id TEXT,
  final_receipt_id TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  ttl_expires_at TEXT
);
CREATE TABLE IF NOT EXISTS slack_outbox (
  notification_id TEXT PRIMARY KEY,
  approval_id TEXT NOT NULL,
  channel TEXT NOT NULL,
  message_json TEXT NOT NULL,
  status TEXT NOT NULL,
  attempt_count INTEGER NOT NULL,
  next_attempt_at TEXT NOT NULL,
  last_error TEXT,
  sent_at TEXT,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS slack_outbox_due ON slack_outbox(status, next_attempt_at);
";

// ============================================================================//
// SECTION: Config
// ============================================================================//

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` ledger.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteLedgerConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteLedgerConfig {
    /// Builds a config with defaults for the provided path.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================//
// SECTION: Errors
// ============================================================================//

/// `SQLite` ledger errors.
#[derive(Debug, Error)]
pub enum SqliteLedgerError {
    /// Store I/O error.
    #[error("sqlite ledger io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite ledger db error: {0}")]
    Db(String),
}

impl From<SqliteLedgerError> for LedgerError {
    fn from(error: SqliteLedgerError) -> Self {
        match error {
            SqliteLedgerError::Io(message) => Self::Io(message),
            SqliteLedgerError::Db(message) => Self::Db(message),
        }
    }
}

fn db_err(err: rusqlite::Error) -> LedgerError {
    LedgerError::Db(err.to_string())
}

// ============================================================================//
// SECTION: Store
// ============================================================================//

/// `SQLite`-backed ledger with WAL journaling.
#[derive(Clone)]
pub struct SqliteLedger {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Opens an `SQLite`-backed ledger, applying the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLedgerError`] when the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteLedgerConfig) -> Result<Self, SqliteLedgerError> {
        ensure_parent_dir(&config.path)?;
        let connection = Connection::open(&config.path)
            .map_err(|err| SqliteLedgerError::Db(err.to_string()))?;
        initialize(&connection, config)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Opens an in-memory ledger for tests and dev mode.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteLedgerError`] when initialization fails.
    pub fn open_in_memory() -> Result<Self, SqliteLedgerError> {
        let connection =
            Connection::open_in_memory().map_err(|err| SqliteLedgerError::Db(err.to_string()))?;
        connection
            .execute_batch(SCHEMA)
            .map_err(|err| SqliteLedgerError::Db(err.to_string()))?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, LedgerError> {
        self.connection
            .lock()
            .map_err(|_| LedgerError::Db("connection mutex poisoned".to_string()))
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), SqliteLedgerError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|err| SqliteLedgerError::Io(err.to_string()))?;
        }
    }
    Ok(())
}

fn initialize(
    connection: &Connection,
    config: &SqliteLedgerConfig,
) -> Result<(), SqliteLedgerError> {
    let db = |err: rusqlite::Error| SqliteLedgerError::Db(err.to_string());
    // journal_mode reports the resulting mode as a row.
    connection
        .query_row("PRAGMA journal_mode = wal", [], |_| Ok(()))
        .map_err(db)?;
    connection
        .pragma_update(None, "synchronous", config.sync_mode.pragma_value())
        .map_err(db)?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(db)?;
    connection
        .pragma_update(None, "foreign_keys", "on")
        .map_err(db)?;
    connection.execute_batch(SCHEMA).map_err(db)
}

impl Ledger for SqliteLedger {
    fn with_tx(
        &self,
        f: &mut dyn FnMut(&mut dyn LedgerTx) -> Result<(), LedgerError>,
    ) -> Result<(), LedgerError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(db_err)?;
        let result = {
            let mut wrapped = SqliteTx { tx: &tx };
            f(&mut wrapped)
        };
        match result {
            Ok(()) => tx.commit().map_err(db_err),
            Err(err) => {
                // Explicit rollback keeps the error from the callback.
                let _ = tx.rollback();
                Err(err)
            }
        }
    }

    fn list_outbox_due(&self, now: &str, limit: usize) -> Result<Vec<OutboxRow>, LedgerError> {
        let limit = if limit == 0 { 100 } else { limit };
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT notification_id, approval_id, channel, message_json, status, \
                 attempt_count, next_attempt_at, last_error, sent_at, created_at, updated_at \
                 FROM slack_outbox \
                 WHERE status = 'pending' AND next_attempt_at <= ?1 \
                 ORDER BY created_at ASC \
                 LIMIT ?2",
            )
            .map_err(db_err)?;
        let rows = statement
            .query_map(params![now, limit as i64], outbox_from_row)
            .map_err(db_err)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)??);
        }
        Ok(out)
    }
}

// ============================================================================//
// SECTION: Transaction
// ============================================================================//

struct SqliteTx<'a> {
    tx: &'a Transaction<'a>,
}

impl LedgerTx for SqliteTx<'_> {
    fn put_key(&mut self, row: &KeyRow) -> Result<(), LedgerError> {
        self.tx
            .execute(
                "INSERT INTO keys(key_id, public_key, created_at, rotated_at) \
                 VALUES(?1, ?2, ?3, ?4) \
                 ON CONFLICT(key_id) DO NOTHING",
                params![
                    row.key_id.as_str(),
                    row.public_key,
                    row.created_at,
                    row.rotated_at
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_key(&mut self, key_id: &str) -> Result<Option<KeyRow>, LedgerError> {
        self.tx
            .query_row(
                "SELECT key_id, public_key, created_at, rotated_at FROM keys WHERE key_id = ?1",
                params![key_id],
                |row| {
                    Ok(KeyRow {
                        key_id: KeyId::new(row.get::<_, String>(0)?),
                        public_key: row.get(1)?,
                        created_at: row.get(2)?,
                        rotated_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn put_outbox(&mut self, row: &OutboxRow) -> Result<(), LedgerError> {
        self.tx
            .execute(
                "INSERT INTO slack_outbox(notification_id, approval_id, channel, message_json, \
                 status, attempt_count, next_attempt_at, last_error, sent_at, created_at, updated_at) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
                 ON CONFLICT(notification_id) DO UPDATE SET \
                 status = excluded.status, \
                 attempt_count = excluded.attempt_count, \
                 next_attempt_at = excluded.next_attempt_at, \
                 last_error = excluded.last_error, \
                 sent_at = excluded.sent_at, \
                 updated_at = excluded.updated_at",
                params![
                    row.notification_id,
                    row.approval_id.as_str(),
                    row.channel,
                    String::from_utf8_lossy(&row.message_json).into_owned(),
                    row.status.as_str(),
                    row.attempt_count,
                    row.next_attempt_at,
                    row.last_error,
                    row.sent_at,
                    row.created_at,
                    row.updated_at
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_outbox(&mut self, notification_id: &str) -> Result<Option<OutboxRow>, LedgerError> {
        self.tx
            .query_row(
                "SELECT notification_id, approval_id, channel, message_json, status, \
                 attempt_count, next_attempt_at, last_error, sent_at, created_at, updated_at \
                 FROM slack_outbox WHERE notification_id = ?1",
                params![notification_id],
                outbox_from_row,
            )
            .optional()
            .map_err(db_err)?
            .transpose()
    }

    fn put_policy_version(&mut self, row: &PolicyVersionRow) -> Result<(), LedgerError> {
        self.tx
            .execute(
                "INSERT INTO policy_versions(policy_hash, policy_id, policy_version, policy_yaml, created_at) \
                 VALUES(?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(policy_hash) DO NOTHING",
                params![
                    row.policy_hash,
                    row.policy_id,
                    row.policy_version,
                    row.policy_yaml,
                    row.created_at
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
            .query_row(
                "SELECT policy_hash, policy_id, policy_version, policy_yaml, created_at \
                 FROM policy_versions WHERE policy_hash = ?1",
                params![policy_hash],
                |row| {
                    Ok(PolicyVersionRow {
                        policy_hash: row.get(0)?,
                        policy_id: row.get(1)?,
                        policy_version: row.get(2)?,
                        policy_yaml: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn put_context(&mut self, row: &ContextRow) -> Result<(), LedgerError> {
        ensure_json_body(&row.body_json)?;
        self.tx
            .execute(
                "INSERT INTO contexts(context_id, body_json, created_at) VALUES(?1, ?2, ?3) \
                 ON CONFLICT(context_id) DO NOTHING",
                params![
                    row.context_id.as_str(),
                    String::from_utf8_lossy(&row.body_json).into_owned(),
                    row.created_at
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_context(&mut self, context_id: &str) -> Result<Option<ContextRow>, LedgerError> {
        self.tx
            .query_row(
                "SELECT context_id, body_json, created_at FROM contexts WHERE context_id = ?1",
                params![context_id],
                |row| {
                    Ok(ContextRow {
                        context_id: ContextId::new(row.get::<_, String>(0)?),
                        body_json: row.get::<_, String>(1)?.into_bytes(),
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn put_decision(&mut self, row: &DecisionRow) -> Result<(), LedgerError> {
        ensure_json_body(&row.body_json)?;
        self.tx
            .execute(
                "INSERT INTO decisions(decision_id, context_id, policy_hash, verdict, body_json, created_at) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(decision_id) DO NOTHING",
                params![
                    row.decision_id.as_str(),
                    row.context_id.as_str(),
                    row.policy_hash,
                    row.verdict,
                    String::from_utf8_lossy(&row.body_json).into_owned(),
                    row.created_at
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_decision(&mut self, decision_id: &str) -> Result<Option<DecisionRow>, LedgerError> {
        self.tx
            .query_row(
                "SELECT decision_id, context_id, policy_hash, verdict, body_json, created_at \
                 FROM decisions WHERE decision_id = ?1",
                params![decision_id],
                |row| {
                    Ok(DecisionRow {
                        decision_id: DecisionId::new(row.get::<_, String>(0)?),
                        context_id: ContextId::new(row.get::<_, String>(1)?),
                        policy_hash: row.get(2)?,
                        verdict: row.get(3)?,
                        body_json: row.get::<_, String>(4)?.into_bytes(),
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn put_receipt(&mut self, receipt: &StoredReceipt) -> Result<(), LedgerError> {
        if receipt.receipt_id.is_empty() {
            return Err(LedgerError::Invalid("missing receipt_id".to_string()));
        }
        ensure_json_body(&receipt.body_json)?;
        self.tx
            .execute(
                "INSERT INTO receipts(receipt_id, idem_key, created_at, supersedes_receipt_id, \
                 context_id, decision_id, policy_hash, approval_id, outcome_status, final, \
                 expires_at, body_json, body_digest, key_id, sig) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
                 ON CONFLICT(receipt_id) DO NOTHING",
                params![
                    receipt.receipt_id.as_str(),
                    receipt.idem_key.as_str(),
                    receipt.created_at,
                    receipt.supersedes_receipt_id.as_ref().map(ReceiptId::as_str),
                    receipt.context_id.as_str(),
                    receipt.decision_id.as_str(),
                    receipt.policy_hash,
                    receipt.approval_id.as_ref().map(ApprovalId::as_str),
                    receipt.outcome_status.as_str(),
                    i64::from(receipt.is_final),
                    receipt.expires_at,
                    String::from_utf8_lossy(&receipt.body_json).into_owned(),
                    receipt.body_digest,
                    receipt.key_id.as_str(),
                    receipt.sig
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_receipt(&mut self, receipt_id: &str) -> Result<Option<StoredReceipt>, LedgerError> {
        self.tx
            .query_row(
                "SELECT receipt_id, idem_key, created_at, supersedes_receipt_id, context_id, \
                 decision_id, policy_hash, approval_id, outcome_status, final, expires_at, \
                 body_json, body_digest, key_id, sig \
                 FROM receipts WHERE receipt_id = ?1",
                params![receipt_id],
                receipt_from_row,
            )
            .optional()
            .map_err(db_err)?
            .transpose()
    }

    fn put_approval(&mut self, row: &ApprovalRow) -> Result<(), LedgerError> {
        self.tx
            .execute(
                "INSERT INTO approvals(approval_id, idem_key, status, slack_channel, slack_msg_ts, \
                 approved_by, approved_at, created_at, updated_at) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(approval_id) DO UPDATE SET \
                 status = excluded.status, \
                 slack_channel = COALESCE(excluded.slack_channel, approvals.slack_channel), \
                 slack_msg_ts = COALESCE(excluded.slack_msg_ts, approvals.slack_msg_ts), \
                 approved_by = COALESCE(excluded.approved_by, approvals.approved_by), \
                 approved_at = COALESCE(excluded.approved_at, approvals.approved_at), \
                 updated_at = excluded.updated_at",
                params![
                    row.approval_id.as_str(),
                    row.idem_key.as_str(),
                    row.status.as_str(),
                    row.slack_channel,
                    row.slack_msg_ts,
                    row.approved_by,
                    row.approved_at,
                    row.created_at,
                    row.updated_at
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_approval(&mut self, approval_id: &str) -> Result<Option<ApprovalRow>, LedgerError> {
        self.tx
            .query_row(
                "SELECT approval_id, idem_key, status, slack_channel, slack_msg_ts, approved_by, \
                 approved_at, created_at, updated_at \
                 FROM approvals WHERE approval_id = ?1",
                params![approval_id],
                approval_from_row,
            )
            .optional()
            .map_err(db_err)?
            .transpose()
    }

    fn get_approval_by_idem_key(
        &mut self,
        idem_key: &str,
    ) -> Result<Option<ApprovalRow>, LedgerError> {
        self.tx
            .query_row(
                "SELECT approval_id, idem_key, status, slack_channel, slack_msg_ts, approved_by, \
                 approved_at, created_at, updated_at \
                 FROM approvals WHERE idem_key = ?1",
                params![idem_key],
                approval_from_row,
            )
            .optional()
            .map_err(db_err)?
            .transpose()
    }

    fn put_idem_key(&mut self, row: &IdemKeyRow) -> Result<(), LedgerError> {
        self.tx
            .execute(
                "INSERT INTO idempotency_keys(idem_key, status, approval_id, latest_receipt_id, \
                 final_receipt_id, created_at, updated_at, ttl_expires_at) \
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(idem_key) DO UPDATE SET \
                 status = excluded.status, \
                 approval_id = excluded.approval_id, \
                 latest_receipt_id = excluded.latest_receipt_id, \
                 final_receipt_id = excluded.final_receipt_id, \
                 updated_at = excluded.updated_at, \
                 ttl_expires_at = excluded.ttl_expires_at",
                params![
                    row.idem_key.as_str(),
                    row.status,
                    row.approval_id.as_ref().map(ApprovalId::as_str),
                    row.latest_receipt_id.as_ref().map(ReceiptId::as_str),
                    row.final_receipt_id.as_ref().map(ReceiptId::as_str),
                    row.created_at,
                    row.updated_at,
                    row.ttl_expires_at
                ],
            )
            .map(|_| ())
            .map_err(db_err)
    }

    fn get_idem_key(&mut self, idem_key: &str) -> Result<Option<IdemKeyRow>, LedgerError> {
        self.tx
            .query_row(
                "SELECT idem_key, status, approval_id, latest_receipt_id, final_receipt_id, \
                 created_at, updated_at, ttl_expires_at \
                 FROM idempotency_keys WHERE idem_key = ?1",
                params![idem_key],
                |row| {
                    Ok(IdemKeyRow {
                        idem_key: IdemKey::new(row.get::<_, String>(0)?),
                        status: row.get(1)?,
                        approval_id: row.get::<_, Option<String>>(2)?.map(ApprovalId::new),
                        latest_receipt_id: row.get::<_, Option<String>>(3)?.map(ReceiptId::new),
                        final_receipt_id: row.get::<_, Option<String>>(4)?.map(ReceiptId::new),
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                        ttl_expires_at: row.get(7)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }
}

// ============================================================================//
// SECTION: Row Mapping
// ============================================================================//

fn outbox_from_row(row: &Row<'_>) -> rusqlite::Result<Result<OutboxRow, LedgerError>> {
    let status_text: String = row.get(4)?;
    let status = match OutboxStatus::parse(&status_text) {
        Some(status) => status,
        None => {
            return Ok(Err(LedgerError::Corrupt(format!(
                "unknown outbox status: {status_text}"
            ))));
        }
    };
    Ok(Ok(OutboxRow {
        notification_id: row.get(0)?,
        approval_id: ApprovalId::new(row.get::<_, String>(1)?),
        channel: row.get(2)?,
        message_json: row.get::<_, String>(3)?.into_bytes(),
        status,
        attempt_count: row.get(5)?,
        next_attempt_at: row.get(6)?,
        last_error: row.get(7)?,
        sent_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    }))
}

fn approval_from_row(row: &Row<'_>) -> rusqlite::Result<Result<ApprovalRow, LedgerError>> {
    let status_text: String = row.get(2)?;
    let status = match ApprovalStatus::parse(&status_text) {
        Some(status) => status,
        None => {
            return Ok(Err(LedgerError::Corrupt(format!(
                "unknown approval status: {status_text}"
            ))));
        }
    };
    Ok(Ok(ApprovalRow {
        approval_id: ApprovalId::new(row.get::<_, String>(0)?),
        idem_key: IdemKey::new(row.get::<_, String>(1)?),
        status,
        slack_channel: row.get(3)?,
        slack_msg_ts: row.get(4)?,
        approved_by: row.get(5)?,
        approved_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    }))
}

fn receipt_from_row(row: &Row<'_>) -> rusqlite::Result<Result<StoredReceipt, LedgerError>> {
    let status_text: String = row.get(8)?;
    let outcome_status = match OutcomeStatus::parse(&status_text) {
        Some(status) => status,
        None => {
            return Ok(Err(LedgerError::Corrupt(format!(
                "unknown outcome status: {status_text}"
            ))));
        }
    };
    Ok(Ok(StoredReceipt {
        receipt_id: ReceiptId::new(row.get::<_, String>(0)?),
        idem_key: IdemKey::new(row.get::<_, String>(1)?),
        created_at: row.get(2)?,
        supersedes_receipt_id: row.get::<_, Option<String>>(3)?.map(ReceiptId::new),
        context_id: ContextId::new(row.get::<_, String>(4)?),
        decision_id: DecisionId::new(row.get::<_, String>(5)?),
        policy_hash: row.get(6)?,
        approval_id: row.get::<_, Option<String>>(7)?.map(ApprovalId::new),
        outcome_status,
        is_final: row.get::<_, i64>(9)? != 0,
        expires_at: row.get(10)?,
        body_json: row.get::<_, String>(11)?.into_bytes(),
        body_digest: row.get(12)?,
        key_id: KeyId::new(row.get::<_, String>(13)?),
        sig: row.get(14)?,
    }))
}
