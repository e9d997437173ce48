// relia-gateway/src/lib.rs
// ============================================================================
// Module: Relia Gateway Library
// Description: Authorize flow, approvals, outbox worker, and HTTP surface.
// Purpose: Expose the gateway services for the binary and integration tests.
// Dependencies: crate submodules
// ============================================================================

//! ## Overview
//! The gateway turns attested workload identities into signed receipts and,
//! when policy permits, scoped credentials. All durable state lives in the
//! ledger; the service layer drives every transition through one ledger
//! transaction so retries converge on a single outcome.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod auth;
pub mod broker;
pub mod config;
pub mod handlers;
pub mod outbox;
pub mod service;
pub mod slack;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use auth::ActorClaims;
pub use auth::AuthError;
pub use auth::Authenticator;
pub use broker::AssumeRoleInput;
pub use broker::BrokerError;
pub use broker::CredentialBroker;
pub use broker::Credentials;
pub use broker::DevBroker;
pub use broker::HttpBroker;
pub use config::Config;
pub use config::ConfigError;
pub use handlers::AppState;
pub use handlers::router;
pub use outbox::process_outbox_due;
pub use outbox::run_outbox_worker;
pub use service::AuthorizeRequest;
pub use service::AuthorizeResponse;
pub use service::AuthorizeService;
pub use service::AuthorizeServiceInput;
pub use service::RequestEvidence;
pub use service::ServiceError;
pub use slack::ApprovalMessage;
pub use slack::ChatPoster;
pub use slack::SlackPoster;
pub use slack::verify_slack_signature;
