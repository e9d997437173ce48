// relia-gateway/src/broker.rs
// ============================================================================
// Module: Credential Broker
// Description: Capability contract and implementations for credential exchange.
// Purpose: Turn an allowed decision into short-lived scoped credentials.
// Dependencies: reqwest, serde, time, thiserror
// ============================================================================

//! ## Overview
//! The broker exchanges a workload's web identity token for scoped cloud
//! credentials bound to a policy role. The contract is the only thing the
//! authorize flow depends on; [`DevBroker`] returns deterministic placeholder
//! credentials for development and tests, and [`HttpBroker`] posts the
//! request to an operator-run broker endpoint as JSON.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Contract
// ============================================================================

/// Inputs for one credential exchange.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssumeRoleInput {
    /// Role bound by the policy decision.
    pub role_arn: String,
    /// Web identity token presented by the workload.
    pub web_identity_token: String,
    /// Requested credential lifetime in seconds.
    pub ttl_seconds: i64,
    /// Issuing region.
    pub region: String,
}

/// Issued credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    /// Access key identifier.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token.
    pub session_token: String,
    /// Expiry timestamp (RFC3339, UTC).
    pub expires_at: String,
}

/// Broker failures.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A required input was missing or out of range.
    #[error("invalid broker input: {0}")]
    InvalidInput(&'static str),
    /// The broker backend failed.
    #[error("broker error: {0}")]
    Backend(String),
}

/// Capability that exchanges a web identity for scoped credentials.
pub trait CredentialBroker: Send + Sync {
    /// Exchanges the input for credentials.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] on invalid input or backend failure.
    fn assume_role(&self, input: &AssumeRoleInput) -> Result<Credentials, BrokerError>;
}

fn validate(input: &AssumeRoleInput) -> Result<(), BrokerError> {
    if input.role_arn.trim().is_empty() {
        return Err(BrokerError::InvalidInput("role_arn"));
    }
    if input.ttl_seconds < 1 {
        return Err(BrokerError::InvalidInput("ttl_seconds"));
    }
    Ok(())
}

// ============================================================================
// SECTION: Dev Broker
// ============================================================================

/// Broker returning deterministic placeholder credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevBroker;

impl CredentialBroker for DevBroker {
    fn assume_role(&self, input: &AssumeRoleInput) -> Result<Credentials, BrokerError> {
        validate(input)?;
        let expires = OffsetDateTime::now_utc() + Duration::seconds(input.ttl_seconds);
        Ok(Credentials {
            access_key_id: "AKIA-DEV-PLACEHOLDER".to_string(),
            secret_access_key: "dev-secret-placeholder".to_string(),
            session_token: "dev-session-placeholder".to_string(),
            expires_at: expires
                .format(&Rfc3339)
                .map_err(|err| BrokerError::Backend(err.to_string()))?,
        })
    }
}

// ============================================================================
// SECTION: HTTP Broker
// ============================================================================

/// Broker posting the exchange request to an HTTP endpoint as JSON.
pub struct HttpBroker {
    /// Broker endpoint URL.
    url: String,
    /// Blocking HTTP client.
    client: reqwest::blocking::Client,
}

impl HttpBroker {
    /// Builds a broker for the provided endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] when the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>) -> Result<Self, BrokerError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|err| BrokerError::Backend(err.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl CredentialBroker for HttpBroker {
    fn assume_role(&self, input: &AssumeRoleInput) -> Result<Credentials, BrokerError> {
        validate(input)?;
        if input.web_identity_token.trim().is_empty() {
            return Err(BrokerError::InvalidInput("web_identity_token"));
        }

        let response = self
            .client
            .post(&self.url)
            .json(input)
            .send()
            .map_err(|err| BrokerError::Backend(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BrokerError::Backend(format!(
                "broker returned {status}: {body}"
            )));
        }

        response
            .json::<Credentials>()
            .map_err(|err| BrokerError::Backend(err.to_string()))
    }
}
