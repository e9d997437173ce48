// relia-core/src/runtime/pack.rs
// ============================================================================
// Module: Relia Pack Builder
// Description: Tamper-evident zip bundle of a receipt and its records.
// Purpose: Export receipt, context, decision, policy, and digests as one file.
// Dependencies: serde, serde_json, zip, crate::core
// ============================================================================

//! ## Overview
//! A pack bundles the exact stored bytes of a receipt chain entry with its
//! context, decision, and the raw policy that produced them, plus a manifest
//! and a per-file digest index. Entries are written byte-identical to the
//! ledger contents; re-serializing them would break the content-addressed
//! identities the pack exists to prove.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Cursor;
use std::io::Write;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::canonical::CanonError;
use crate::core::canonical::canonical_from;
use crate::core::canonical::digest_hex;
use crate::core::grade;
use crate::core::grade::GradeInput;
use crate::core::identifiers::ApprovalId;
use crate::core::identifiers::ReceiptId;
use crate::core::receipt::StoredReceipt;
use crate::core::records::ContextRecord;
use crate::core::records::DecisionRecord;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema identifier for pack manifests.
pub const PACK_SCHEMA: &str = "relia.pack.v0.1";

/// Pack entry holding the receipt body.
const RECEIPT_ENTRY: &str = "receipt.json";
/// Pack entry holding the context body.
const CONTEXT_ENTRY: &str = "context.json";
/// Pack entry holding the decision body.
const DECISION_ENTRY: &str = "decision.json";
/// Pack entry holding the raw policy bytes.
const POLICY_ENTRY: &str = "policy.yaml";
/// Pack entry holding approval summaries.
const APPROVALS_ENTRY: &str = "approvals.json";
/// Pack entry holding the manifest.
const MANIFEST_ENTRY: &str = "manifest.json";
/// Pack entry holding the digest index.
const SUMS_ENTRY: &str = "sha256sums.txt";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while building a pack.
#[derive(Debug, Error)]
pub enum PackError {
    /// The raw policy bytes were missing.
    #[error("missing policy bytes")]
    MissingPolicy,
    /// A stored artifact was not valid JSON.
    #[error("invalid stored artifact {name}: {reason}")]
    InvalidArtifact {
        /// Entry the artifact would have become.
        name: &'static str,
        /// Parse failure detail.
        reason: String,
    },
    /// Canonicalization of a generated entry failed.
    #[error("pack canonicalization failed: {0}")]
    Canon(#[from] CanonError),
    /// Writing the zip failed.
    #[error("zip write failed: {0}")]
    Zip(String),
}

// ============================================================================
// SECTION: Input and Manifest
// ============================================================================

/// Summary of one approval included in the pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSummary {
    /// Approval identifier.
    pub approval_id: ApprovalId,
    /// Approval status string.
    pub status: String,
    /// Receipt the approval finalized into.
    pub receipt_id: ReceiptId,
}

/// Inputs for building one pack.
#[derive(Debug, Clone)]
pub struct PackInput {
    /// The stored receipt.
    pub receipt: StoredReceipt,
    /// Stored context body bytes.
    pub context_body: Vec<u8>,
    /// Stored decision body bytes.
    pub decision_body: Vec<u8>,
    /// Raw policy bytes as hashed into the policy hash.
    pub policy_yaml: Vec<u8>,
    /// Approval summaries attached to the receipt chain.
    pub approvals: Vec<ApprovalSummary>,
    /// Whether the receipt signature verified.
    pub valid: bool,
    /// Pack creation timestamp (RFC3339, UTC).
    pub created_at: String,
}

/// Manifest entry describing the pack itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackManifest {
    /// Manifest schema identifier.
    pub schema: String,
    /// Receipt the pack was built for.
    pub receipt_id: ReceiptId,
    /// Link to the verify endpoint, when a base URL was known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_url: Option<String>,
    /// Link to the pack endpoint, when a base URL was known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_url: Option<String>,
    /// Completeness grade of the receipt.
    pub grade: String,
    /// Pack creation timestamp.
    pub created_at: String,
}

/// Link-bearing summary of a pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackSummary {
    /// Receipt the pack was built for.
    pub receipt_id: ReceiptId,
    /// Link to the verify endpoint, when a base URL was known.
    pub verify_url: Option<String>,
    /// Link to the pack endpoint, when a base URL was known.
    pub pack_url: Option<String>,
    /// Completeness grade of the receipt.
    pub grade: String,
}

// ============================================================================
// SECTION: Building
// ============================================================================

/// Builds the link-bearing summary for a receipt.
///
/// # Errors
///
/// Returns [`PackError::InvalidArtifact`] when stored bodies are malformed.
pub fn build_summary(input: &PackInput, base_url: &str) -> Result<PackSummary, PackError> {
    let context = parse_record::<ContextRecord>(&input.context_body, CONTEXT_ENTRY)?;
    let decision = parse_record::<DecisionRecord>(&input.decision_body, DECISION_ENTRY)?;

    let graded = grade::evaluate(&GradeInput {
        valid: input.valid,
        receipt: &input.receipt,
        context: context.as_ref(),
        decision: decision.as_ref(),
    });

    let (verify_url, pack_url) = if base_url.is_empty() {
        (None, None)
    } else {
        let base = base_url.trim_end_matches('/');
        (
            Some(format!("{base}/v1/verify/{}", input.receipt.receipt_id)),
            Some(format!("{base}/v1/pack/{}", input.receipt.receipt_id)),
        )
    };

    Ok(PackSummary {
        receipt_id: input.receipt.receipt_id.clone(),
        verify_url,
        pack_url,
        grade: graded.grade,
    })
}

/// Builds the pack entries keyed by file name.
///
/// # Errors
///
/// Returns [`PackError::MissingPolicy`] without policy bytes, and
/// [`PackError::InvalidArtifact`] when stored bodies are malformed.
pub fn build_files(
    input: &PackInput,
    base_url: &str,
) -> Result<BTreeMap<String, Vec<u8>>, PackError> {
    if input.policy_yaml.is_empty() {
        return Err(PackError::MissingPolicy);
    }
    ensure_artifact_json(&input.receipt.body_json, RECEIPT_ENTRY)?;
    ensure_artifact_json(&input.context_body, CONTEXT_ENTRY)?;
    ensure_artifact_json(&input.decision_body, DECISION_ENTRY)?;

    let summary = build_summary(input, base_url)?;

    let manifest = PackManifest {
        schema: PACK_SCHEMA.to_string(),
        receipt_id: input.receipt.receipt_id.clone(),
        verify_url: summary.verify_url,
        pack_url: summary.pack_url,
        grade: summary.grade,
        created_at: input.created_at.clone(),
    };

    let mut files = BTreeMap::new();
    files.insert(RECEIPT_ENTRY.to_string(), input.receipt.body_json.clone());
    files.insert(CONTEXT_ENTRY.to_string(), input.context_body.clone());
    files.insert(DECISION_ENTRY.to_string(), input.decision_body.clone());
    files.insert(POLICY_ENTRY.to_string(), input.policy_yaml.clone());
    files.insert(
        APPROVALS_ENTRY.to_string(),
        canonical_from(&input.approvals)?,
    );
    files.insert(MANIFEST_ENTRY.to_string(), canonical_from(&manifest)?);

    let mut sums = String::new();
    for (name, bytes) in &files {
        sums.push_str(&digest_hex(bytes));
        sums.push_str("  ");
        sums.push_str(name);
        sums.push('\n');
    }
    files.insert(SUMS_ENTRY.to_string(), sums.into_bytes());

    Ok(files)
}

/// Builds the pack as zip bytes.
///
/// # Errors
///
/// Propagates [`build_files`] errors and reports zip write failures.
pub fn build_zip(input: &PackInput, base_url: &str) -> Result<Vec<u8>, PackError> {
    let files = build_files(input, base_url)?;
    write_zip(&files)
}

/// Writes entries into a zip archive in name order.
///
/// # Errors
///
/// Returns [`PackError::Zip`] when the archive cannot be written.
pub fn write_zip(files: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>, PackError> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, bytes) in files {
        writer
            .start_file(name.as_str(), options)
            .map_err(|err| PackError::Zip(err.to_string()))?;
        writer
            .write_all(bytes)
            .map_err(|err| PackError::Zip(err.to_string()))?;
    }

    let cursor = writer
        .finish()
        .map_err(|err| PackError::Zip(err.to_string()))?;
    Ok(cursor.into_inner())
}

fn ensure_artifact_json(bytes: &[u8], name: &'static str) -> Result<(), PackError> {
    serde_json::from_slice::<serde::de::IgnoredAny>(bytes)
        .map(|_| ())
        .map_err(|err| PackError::InvalidArtifact {
            name,
            reason: err.to_string(),
        })
}

fn parse_record<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
    name: &'static str,
) -> Result<Option<T>, PackError> {
    ensure_artifact_json(bytes, name)?;
    Ok(serde_json::from_slice::<T>(bytes).ok())
}
