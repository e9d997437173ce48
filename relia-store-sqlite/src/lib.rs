// relia-store-sqlite/src/lib.rs
// ============================================================================
// Module: Relia SQLite Ledger Library
// Description: Embedded single-file ledger backend.
// Purpose: Expose the SQLite implementation of the ledger capability.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! `relia-store-sqlite` persists the Relia ledger in one `SQLite` file with
//! WAL journaling. It implements the same observable semantics as the
//! networked backend: insert-or-ignore for content-addressed rows, upsert
//! for approvals, idempotency keys, and outbox rows.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteLedger;
pub use store::SqliteLedgerConfig;
pub use store::SqliteLedgerError;
pub use store::SqliteSyncMode;
