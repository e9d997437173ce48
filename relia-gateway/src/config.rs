// relia-gateway/src/config.rs
// ============================================================================
// Module: Gateway Configuration
// Description: YAML config model with env expansion and overrides.
// Purpose: Resolve listen address, ledger, keys, policy, Slack, and broker.
// Dependencies: serde, serde_yaml, thiserror
// ============================================================================

//! ## Overview
//! Configuration comes from an optional YAML file plus environment
//! overrides. `${VAR}` references in the file are expanded before parsing so
//! secrets can stay out of the file itself. Validation is fail-closed:
//! enabling Slack without a signing secret or naming a database driver
//! without a DSN refuses to start.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Env Vars
// ============================================================================

/// Listen address override.
pub const ENV_LISTEN_ADDR: &str = "RELIA_LISTEN_ADDR";
/// Policy path override.
pub const ENV_POLICY_PATH: &str = "RELIA_POLICY_PATH";
/// Config file path.
pub const ENV_CONFIG_PATH: &str = "RELIA_CONFIG_PATH";
/// Shared development bearer token.
pub const ENV_DEV_TOKEN: &str = "RELIA_DEV_TOKEN";
/// Expected GitHub OIDC audience.
pub const ENV_OIDC_AUDIENCE: &str = "RELIA_GITHUB_OIDC_AUDIENCE";
/// Slack signing secret override.
pub const ENV_SLACK_SIGNING_SECRET: &str = "RELIA_SLACK_SIGNING_SECRET";

// ============================================================================
// SECTION: Model
// ============================================================================

/// Gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listen address, e.g. `:8080` or `0.0.0.0:8080`.
    #[serde(default)]
    pub listen_addr: String,
    /// Ledger backend selection.
    #[serde(default)]
    pub db: DbConfig,
    /// Path to the policy YAML.
    #[serde(default)]
    pub policy_path: String,
    /// Signing key material.
    #[serde(default)]
    pub signing_key: SigningKeyConfig,
    /// Slack integration.
    #[serde(default)]
    pub slack: SlackConfig,
    /// Credential broker selection.
    #[serde(default)]
    pub broker: BrokerConfig,
}

/// Ledger backend selection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DbConfig {
    /// Driver: `sqlite`, `postgres`, or empty for in-memory dev mode.
    #[serde(default)]
    pub driver: String,
    /// Driver-specific DSN or path.
    #[serde(default)]
    pub dsn: String,
}

/// Signing key configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SigningKeyConfig {
    /// Key identifier registered in the ledger.
    #[serde(default)]
    pub key_id: String,
    /// Path to the private key material.
    #[serde(default)]
    pub private_key_path: String,
}

/// Slack integration configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackConfig {
    /// Whether Slack notifications are enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Bot token used for posting.
    #[serde(default)]
    pub bot_token: String,
    /// Interaction signing secret.
    #[serde(default)]
    pub signing_secret: String,
    /// Channel approval prompts are posted to.
    #[serde(default)]
    pub approval_channel: String,
}

/// Credential broker configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerConfig {
    /// Mode: `dev` (default) or `http`.
    #[serde(default)]
    pub mode: String,
    /// Broker endpoint URL for `http` mode.
    #[serde(default)]
    pub url: String,
    /// Default issuing region.
    #[serde(default)]
    pub region_default: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config read failed: {0}")]
    Read(String),
    /// The config file failed to parse.
    #[error("config parse failed: {0}")]
    Parse(String),
    /// A required field was missing or inconsistent.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl Config {
    /// Loads and validates a config file, expanding `${VAR}` references.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read, parse, or validation failure.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw =
            std::fs::read_to_string(path).map_err(|err| ConfigError::Read(err.to_string()))?;
        Self::from_str(&raw)
    }

    /// Parses and validates config YAML, expanding `${VAR}` references.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on parse or validation failure.
    pub fn from_str(raw: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env(&raw.replace("\r\n", "\n"));
        let config: Self =
            serde_yaml::from_str(&expanded).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.is_empty() {
            return Err(ConfigError::Invalid("listen_addr is required"));
        }
        if self.policy_path.is_empty() {
            return Err(ConfigError::Invalid("policy_path is required"));
        }
        if self.slack.enabled && self.slack.signing_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "slack.signing_secret is required when slack.enabled is true",
            ));
        }
        if !self.db.driver.is_empty() && self.db.dsn.is_empty() {
            return Err(ConfigError::Invalid(
                "db.dsn is required when db.driver is set",
            ));
        }
        if self.broker.mode == "http" && self.broker.url.is_empty() {
            return Err(ConfigError::Invalid(
                "broker.url is required when broker.mode is http",
            ));
        }
        Ok(())
    }
}

/// Expands `${VAR}` references from the process environment.
///
/// Unset variables expand to the empty string; anything that is not a
/// well-formed reference passes through unchanged.
#[must_use]
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if !name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    out.push_str(&env::var(name).unwrap_or_default());
                } else {
                    out.push_str("${");
                    out.push_str(name);
                    out.push('}');
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_env_references() {
        std::env::set_var("RELIA_TEST_EXPAND", "value");
        assert_eq!(expand_env("x: ${RELIA_TEST_EXPAND}"), "x: value");
        assert_eq!(expand_env("x: ${not-a-var}"), "x: ${not-a-var}");
        std::env::remove_var("RELIA_TEST_EXPAND");
    }

    #[test]
    fn slack_requires_signing_secret() {
        let raw = "listen_addr: ':8080'\npolicy_path: policies/relia.yaml\nslack:\n  enabled: true\n";
        assert!(matches!(
            Config::from_str(raw),
            Err(ConfigError::Invalid(_))
        ));
    }
}
