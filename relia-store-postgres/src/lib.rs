// relia-store-postgres/src/lib.rs
// ============================================================================
// Module: Relia Postgres Ledger Library
// Description: Networked RDBMS ledger backend.
// Purpose: Expose the Postgres implementation of the ledger capability.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! `relia-store-postgres` persists the Relia ledger in Postgres with the same
//! observable semantics as the embedded backend. Tables are prefixed
//! `relia_` so the ledger can share a database with other services.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::PostgresLedger;
pub use store::PostgresLedgerError;
