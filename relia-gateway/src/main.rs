// relia-gateway/src/main.rs
// ============================================================================
// Module: Gateway Entry Point
// Description: Config resolution, wiring, and server lifecycle.
// Purpose: Run the Relia authorization gateway.
// Dependencies: axum, clap, relia-core, relia-store-*, tokio, tracing
// ============================================================================

//! ## Overview
//! The binary resolves configuration from flags, environment, and the YAML
//! file, wires the ledger backend, signer, broker, and Slack integration,
//! spawns the outbox worker, and serves the HTTP API until interrupted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use relia_core::KeyId;
use relia_core::Ledger;
use relia_core::LocalSigner;
use relia_core::MemoryLedger;
use relia_core::Signer;
use relia_core::load_signing_key;
use relia_gateway::auth::Authenticator;
use relia_gateway::broker::CredentialBroker;
use relia_gateway::broker::DevBroker;
use relia_gateway::broker::HttpBroker;
use relia_gateway::config;
use relia_gateway::config::Config;
use relia_gateway::handlers::AppState;
use relia_gateway::handlers::router;
use relia_gateway::outbox::run_outbox_worker;
use relia_gateway::service::AuthorizeService;
use relia_gateway::service::AuthorizeServiceInput;
use relia_gateway::slack::SlackPoster;
use relia_store_postgres::PostgresLedger;
use relia_store_sqlite::SqliteLedger;
use relia_store_sqlite::SqliteLedgerConfig;

// ============================================================================
// SECTION: CLI
// ============================================================================

/// Relia authorization gateway.
#[derive(Parser, Debug)]
#[command(name = "relia-gateway")]
struct Cli {
    /// Path to the relia config file.
    #[arg(long, env = config::ENV_CONFIG_PATH)]
    config: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Startup and serve failures.
#[derive(Debug, Error)]
enum GatewayError {
    /// Configuration failure.
    #[error("config error: {0}")]
    Config(String),
    /// Ledger backend failure.
    #[error("ledger error: {0}")]
    Ledger(String),
    /// Signing key failure.
    #[error("signing key error: {0}")]
    SigningKey(String),
    /// Service wiring failure.
    #[error("service error: {0}")]
    Service(String),
    /// Server failure.
    #[error("server error: {0}")]
    Serve(String),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "gateway exited");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), GatewayError> {
    let cfg = match cli.config {
        Some(path) => Config::load(path).map_err(|err| GatewayError::Config(err.to_string()))?,
        None => Config::default(),
    };

    let listen_addr = resolve_listen_addr(&cfg);
    let policy_path = first_non_empty(&[
        std::env::var(config::ENV_POLICY_PATH).unwrap_or_default(),
        cfg.policy_path.clone(),
        "policies/relia.yaml".to_string(),
    ]);

    let ledger = build_ledger(&cfg)?;
    let (signer, public_key) = build_signer(&cfg)?;
    let broker = build_broker(&cfg)?;

    let slack_signing_secret = first_optional(&[
        std::env::var(config::ENV_SLACK_SIGNING_SECRET).unwrap_or_default(),
        cfg.slack.signing_secret.clone(),
    ]);
    let slack_channel = cfg
        .slack
        .enabled
        .then(|| cfg.slack.approval_channel.clone())
        .filter(|channel| !channel.is_empty());

    let service = Arc::new(
        AuthorizeService::new(AuthorizeServiceInput {
            policy_path: PathBuf::from(policy_path),
            ledger: Some(Arc::clone(&ledger)),
            signer: Some(signer),
            public_key: Some(public_key),
            broker: Some(broker),
            slack_channel,
            broker_region: non_empty(cfg.broker.region_default.clone()),
        })
        .map_err(|err| GatewayError::Service(err.to_string()))?,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    if cfg.slack.enabled && !cfg.slack.bot_token.is_empty() {
        let poster = SlackPoster::new(cfg.slack.bot_token.clone())
            .map_err(|err| GatewayError::Service(err.to_string()))?;
        tokio::spawn(run_outbox_worker(
            Arc::clone(&ledger),
            Arc::new(poster),
            std::time::Duration::from_secs(2),
            shutdown_rx.clone(),
        ));
    }

    let state = Arc::new(AppState {
        auth: Authenticator::new(std::env::var(config::ENV_DEV_TOKEN).ok()),
        service,
        slack_signing_secret,
    });

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .map_err(|err| GatewayError::Serve(err.to_string()))?;
    tracing::info!(addr = %listen_addr, "relia-gateway listening");

    let serve = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });
    serve
        .await
        .map_err(|err| GatewayError::Serve(err.to_string()))
}

// ============================================================================
// SECTION: Wiring
// ============================================================================

fn build_ledger(cfg: &Config) -> Result<Arc<dyn Ledger>, GatewayError> {
    match cfg.db.driver.as_str() {
        "" | "memory" => Ok(Arc::new(MemoryLedger::new())),
        "sqlite" => {
            let ledger = SqliteLedger::open(&SqliteLedgerConfig::for_path(&cfg.db.dsn))
                .map_err(|err| GatewayError::Ledger(err.to_string()))?;
            Ok(Arc::new(ledger))
        }
        "postgres" => {
            let ledger = PostgresLedger::connect(&cfg.db.dsn)
                .map_err(|err| GatewayError::Ledger(err.to_string()))?;
            Ok(Arc::new(ledger))
        }
        other => Err(GatewayError::Config(format!("unsupported db driver: {other}"))),
    }
}

fn build_signer(
    cfg: &Config,
) -> Result<(Arc<dyn Signer>, ed25519_dalek::VerifyingKey), GatewayError> {
    let key_id = KeyId::new(if cfg.signing_key.key_id.is_empty() {
        "dev".to_string()
    } else {
        cfg.signing_key.key_id.clone()
    });

    let signer = if cfg.signing_key.private_key_path.is_empty() {
        tracing::warn!("no signing key configured; generating an ephemeral dev key");
        LocalSigner::generate(key_id)
    } else {
        let raw = std::fs::read(&cfg.signing_key.private_key_path)
            .map_err(|err| GatewayError::SigningKey(err.to_string()))?;
        let key =
            load_signing_key(&raw).map_err(|err| GatewayError::SigningKey(err.to_string()))?;
        LocalSigner::new(key_id, key)
    };

    let public_key = signer.public_key();
    Ok((Arc::new(signer), public_key))
}

fn build_broker(cfg: &Config) -> Result<Arc<dyn CredentialBroker>, GatewayError> {
    match cfg.broker.mode.as_str() {
        "" | "dev" => Ok(Arc::new(DevBroker)),
        "http" => {
            let broker = HttpBroker::new(cfg.broker.url.clone())
                .map_err(|err| GatewayError::Config(err.to_string()))?;
            Ok(Arc::new(broker))
        }
        other => Err(GatewayError::Config(format!(
            "unsupported broker mode: {other}"
        ))),
    }
}

// ============================================================================
// SECTION: Resolution Helpers
// ============================================================================

fn resolve_listen_addr(cfg: &Config) -> String {
    let addr = first_non_empty(&[
        std::env::var(config::ENV_LISTEN_ADDR).unwrap_or_default(),
        cfg.listen_addr.clone(),
        ":8080".to_string(),
    ]);
    // `:8080` shorthand binds all interfaces.
    if let Some(port) = addr.strip_prefix(':') {
        return format!("0.0.0.0:{port}");
    }
    addr
}

fn first_non_empty(values: &[String]) -> String {
    values
        .iter()
        .find(|value| !value.is_empty())
        .cloned()
        .unwrap_or_default()
}

fn first_optional(values: &[String]) -> Option<String> {
    values.iter().find(|value| !value.is_empty()).cloned()
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
