// relia-cli/src/main.rs
// ============================================================================
// Module: Relia CLI Entry Point
// Description: Verify, pack, and policy tooling against a Relia gateway.
// Purpose: Provide a thin client for receipts and offline policy checks.
// Dependencies: clap, relia-core, reqwest, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The CLI is a thin HTTP client plus offline policy tooling. `verify` and
//! `pack` call the gateway API with bearer auth; `policy lint` and
//! `policy test` run entirely locally against a policy file. Exit codes:
//! 0 on success, 1 on failed verification or errors, 2 on usage errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use serde::Deserialize;
use thiserror::Error;

use relia_core::LoadedPolicy;
use relia_core::PolicyInput;
use relia_core::core::policy;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default gateway address.
const DEFAULT_ADDR: &str = "http://localhost:8080";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Relia command-line client.
#[derive(Parser, Debug)]
#[command(name = "relia", version, about = "Relia receipt and policy tooling")]
struct Cli {
    /// Selected subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Supported subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify a receipt against the gateway.
    Verify(VerifyCommand),
    /// Download the pack zip for a receipt.
    Pack(PackCommand),
    /// Policy tooling.
    Policy {
        /// Selected policy subcommand.
        #[command(subcommand)]
        command: PolicyCommand,
    },
}

/// Arguments shared by gateway-facing commands.
#[derive(Args, Debug, Clone)]
struct GatewayArgs {
    /// Gateway API address.
    #[arg(long, env = "RELIA_ADDR", default_value = DEFAULT_ADDR)]
    addr: String,
    /// Bearer token; falls back to `RELIA_DEV_TOKEN`.
    #[arg(long, env = "RELIA_TOKEN")]
    token: Option<String>,
}

impl GatewayArgs {
    fn resolved_token(&self) -> String {
        self.token
            .clone()
            .or_else(|| std::env::var("RELIA_DEV_TOKEN").ok())
            .unwrap_or_default()
    }
}

/// `relia verify <receipt_id>`.
#[derive(Args, Debug)]
struct VerifyCommand {
    /// Receipt identifier to verify.
    receipt_id: String,
    /// Print the raw JSON response.
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    gateway: GatewayArgs,
}

/// `relia pack <receipt_id> --out PATH`.
#[derive(Args, Debug)]
struct PackCommand {
    /// Receipt identifier to pack.
    receipt_id: String,
    /// Output zip path.
    #[arg(long, default_value = "relia-pack.zip")]
    out: PathBuf,
    #[command(flatten)]
    gateway: GatewayArgs,
}

/// Policy subcommands.
#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// Parse a policy file and print its identity and hash.
    Lint {
        /// Path to the policy YAML.
        path: PathBuf,
    },
    /// Evaluate a policy against one input.
    Test(PolicyTestCommand),
}

/// `relia policy test`.
#[derive(Args, Debug)]
struct PolicyTestCommand {
    /// Path to the policy YAML.
    #[arg(long)]
    policy: PathBuf,
    /// Action to evaluate.
    #[arg(long)]
    action: String,
    /// Resource to evaluate.
    #[arg(long)]
    resource: String,
    /// Environment to evaluate.
    #[arg(long)]
    env: String,
    /// Print the decision as JSON.
    #[arg(long)]
    json: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failures; all map to exit code 1.
#[derive(Debug, Error)]
enum CliError {
    /// HTTP request failure.
    #[error("request failed: {0}")]
    Http(String),
    /// The gateway returned a non-success status.
    #[error("gateway returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
    },
    /// Local I/O failure.
    #[error("io error: {0}")]
    Io(String),
    /// Policy parse failure.
    #[error("policy error: {0}")]
    Policy(String),
    /// The receipt failed verification.
    #[error("receipt invalid")]
    ReceiptInvalid,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if !matches!(err, CliError::ReceiptInvalid) {
                eprintln!("{err}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Verify(command) => run_verify(&command),
        Commands::Pack(command) => run_pack(&command),
        Commands::Policy { command } => match command {
            PolicyCommand::Lint { path } => run_policy_lint(&path),
            PolicyCommand::Test(command) => run_policy_test(&command),
        },
    }
}

// ============================================================================
// SECTION: Gateway Commands
// ============================================================================

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    receipt_id: String,
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    grade: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn http_get(addr: &str, path: &str, token: &str) -> Result<(u16, Vec<u8>), CliError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|err| CliError::Http(err.to_string()))?;
    let url = format!("{}{}", addr.trim_end_matches('/'), path);
    let mut request = client.get(url);
    if !token.is_empty() {
        request = request.bearer_auth(token);
    }
    let response = request.send().map_err(|err| CliError::Http(err.to_string()))?;
    let status = response.status().as_u16();
    let body = response
        .bytes()
        .map_err(|err| CliError::Http(err.to_string()))?
        .to_vec();
    Ok((status, body))
}

fn run_verify(command: &VerifyCommand) -> Result<(), CliError> {
    let (status, body) = http_get(
        &command.gateway.addr,
        &format!("/v1/verify/{}", command.receipt_id),
        &command.gateway.resolved_token(),
    )?;

    if command.json {
        let mut stdout = std::io::stdout();
        stdout
            .write_all(&body)
            .map_err(|err| CliError::Io(err.to_string()))?;
    }

    if status != 200 {
        return Err(CliError::Status {
            status,
            body: String::from_utf8_lossy(&body).trim().to_string(),
        });
    }

    let payload: VerifyResponse =
        serde_json::from_slice(&body).map_err(|err| CliError::Http(err.to_string()))?;

    if command.json {
        return if payload.valid {
            Ok(())
        } else {
            Err(CliError::ReceiptInvalid)
        };
    }

    if payload.valid {
        match &payload.grade {
            Some(grade) => println!(
                "valid=true receipt_id={} grade={grade}",
                payload.receipt_id
            ),
            None => println!("valid=true receipt_id={}", payload.receipt_id),
        }
        Ok(())
    } else {
        println!(
            "valid=false receipt_id={} error={}",
            payload.receipt_id,
            payload.error.unwrap_or_default()
        );
        Err(CliError::ReceiptInvalid)
    }
}

fn run_pack(command: &PackCommand) -> Result<(), CliError> {
    let (status, body) = http_get(
        &command.gateway.addr,
        &format!("/v1/pack/{}", command.receipt_id),
        &command.gateway.resolved_token(),
    )?;

    if status != 200 {
        return Err(CliError::Status {
            status,
            body: String::from_utf8_lossy(&body).trim().to_string(),
        });
    }

    std::fs::write(&command.out, &body).map_err(|err| CliError::Io(err.to_string()))?;
    println!("wrote {} ({} bytes)", command.out.display(), body.len());
    Ok(())
}

// ============================================================================
// SECTION: Policy Commands
// ============================================================================

fn load_policy_file(path: &PathBuf) -> Result<LoadedPolicy, CliError> {
    let bytes = std::fs::read(path).map_err(|err| CliError::Io(err.to_string()))?;
    LoadedPolicy::from_bytes(&bytes).map_err(|err| CliError::Policy(err.to_string()))
}

fn run_policy_lint(path: &PathBuf) -> Result<(), CliError> {
    let loaded = load_policy_file(path)?;
    println!(
        "ok policy_id={} policy_hash={}",
        loaded.policy.policy_id, loaded.hash
    );
    Ok(())
}

fn run_policy_test(command: &PolicyTestCommand) -> Result<(), CliError> {
    let loaded = load_policy_file(&command.policy)?;
    let decision = policy::evaluate(
        &loaded.policy,
        &loaded.hash,
        &PolicyInput {
            action: command.action.clone(),
            resource: command.resource.clone(),
            env: command.env.clone(),
        },
    );

    if command.json {
        let payload = serde_json::json!({
            "verdict": decision.verdict.as_str(),
            "require_approval": decision.require_approval,
            "ttl_seconds": decision.ttl_seconds,
            "aws_role_arn": decision.aws_role_arn,
            "risk": decision.risk,
            "reason": decision.reason,
            "matched_rule_id": decision.matched_rule_id,
            "reason_codes": decision.reason_codes,
            "policy_id": decision.policy_id,
            "policy_version": decision.policy_version,
            "policy_hash": decision.policy_hash,
        });
        println!("{payload}");
        return Ok(());
    }

    println!(
        "verdict={} require_approval={} ttl_seconds={} matched_rule={}",
        decision.verdict.as_str(),
        decision.require_approval,
        decision.ttl_seconds,
        decision.matched_rule_id.unwrap_or_else(|| "-".to_string())
    );
    Ok(())
}
