// relia-gateway/src/auth.rs
// ============================================================================
// Module: Gateway Authentication
// Description: Bearer extraction and workload claims.
// Purpose: Turn Authorization headers into attested actor claims.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every endpoint requires a bearer token. The dev-token path maps a shared
//! secret to fixed development claims; deployments front the gateway with an
//! OIDC verifier that yields real workload claims through the same
//! [`Authenticator`] seam. Tokens are compared fail-closed and the raw token
//! is carried on the claims for credential brokers that exchange it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Claims
// ============================================================================

/// Attested identity of the calling workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorClaims {
    /// Attested subject.
    pub subject: String,
    /// Token issuer.
    pub issuer: String,
    /// Repository the workload ran from.
    pub repo: String,
    /// Workflow name.
    pub workflow: String,
    /// Workflow run identifier.
    pub run_id: String,
    /// Commit SHA.
    pub sha: String,
    /// Raw bearer token, for web-identity credential exchange.
    pub token: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Authentication failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No bearer token was presented.
    #[error("missing bearer token")]
    MissingBearer,
    /// The presented token did not authenticate.
    #[error("invalid token")]
    InvalidToken,
}

// ============================================================================
// SECTION: Authenticator
// ============================================================================

/// Bearer-token authenticator.
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    /// Shared development token, when configured.
    dev_token: Option<String>,
}

impl Authenticator {
    /// Builds an authenticator with an optional dev token.
    #[must_use]
    pub fn new(dev_token: Option<String>) -> Self {
        Self {
            dev_token: dev_token.filter(|token| !token.is_empty()),
        }
    }

    /// Authenticates an `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingBearer`] without a header and
    /// [`AuthError::InvalidToken`] when the token does not authenticate.
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<ActorClaims, AuthError> {
        let bearer = extract_bearer(authorization)?;

        if let Some(dev_token) = &self.dev_token {
            if bearer == dev_token.as_str() {
                return Ok(ActorClaims {
                    subject: "dev".to_string(),
                    issuer: "relia-dev".to_string(),
                    repo: "dev/repo".to_string(),
                    workflow: "dev".to_string(),
                    run_id: "dev".to_string(),
                    sha: "dev".to_string(),
                    token: bearer.to_string(),
                });
            }
        }

        Err(AuthError::InvalidToken)
    }
}

fn extract_bearer(authorization: Option<&str>) -> Result<&str, AuthError> {
    let header = authorization.ok_or(AuthError::MissingBearer)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidToken)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::InvalidToken);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_token_yields_dev_claims() {
        let auth = Authenticator::new(Some("secret".to_string()));
        let claims = auth.authenticate(Some("Bearer secret")).unwrap();
        assert_eq!(claims.subject, "dev");
        assert_eq!(claims.token, "secret");
    }

    #[test]
    fn missing_header_is_distinct_from_bad_token() {
        let auth = Authenticator::new(Some("secret".to_string()));
        assert_eq!(auth.authenticate(None), Err(AuthError::MissingBearer));
        assert_eq!(
            auth.authenticate(Some("Bearer wrong")),
            Err(AuthError::InvalidToken)
        );
    }
}
