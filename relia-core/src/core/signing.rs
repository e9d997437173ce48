// relia-core/src/core/signing.rs
// ============================================================================
// Module: Relia Signing
// Description: Ed25519 digest signing, receipt verification, and key loading.
// Purpose: Bind receipts to signing keys via 32-byte SHA-256 digests.
// Dependencies: base64, ed25519-dalek, rand, sha2
// ============================================================================

//! ## Overview
//! Signers operate on the 32-byte SHA-256 digest of canonical record bytes,
//! never on the bytes themselves, so a verifier only needs the stored body
//! and the public key. Digest mismatches and signature failures are reported
//! separately: the first means the stored bytes were altered, the second
//! means the signature does not belong to the key.
//!
//! Private key material stays inside [`Signer`] implementations and must
//! never reach the ledger or logs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use ed25519_dalek::Signature;
use ed25519_dalek::Signer as _;
use ed25519_dalek::SigningKey;
use ed25519_dalek::Verifier as _;
use ed25519_dalek::VerifyingKey;
use rand::rngs::OsRng;
use thiserror::Error;

use crate::core::canonical::digest_bytes;
use crate::core::canonical::digest_with_prefix;
use crate::core::identifiers::KeyId;
use crate::core::receipt::StoredReceipt;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Length of a SHA-256 digest in bytes.
pub const DIGEST_LEN: usize = 32;
/// Length of an Ed25519 seed in bytes.
pub const SEED_LEN: usize = 32;
/// Length of an Ed25519 keypair (seed + public key) in bytes.
pub const KEYPAIR_LEN: usize = 64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while signing a digest.
#[derive(Debug, Error)]
pub enum SignError {
    /// The value handed to the signer was not a 32-byte digest.
    #[error("invalid digest length: {0}")]
    InvalidDigestLength(usize),
    /// The signing backend failed.
    #[error("signing failed: {0}")]
    Backend(String),
}

/// Errors raised while verifying a stored receipt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// The receipt identity does not match the digest of its stored bytes.
    #[error("receipt digest mismatch")]
    DigestMismatch,
    /// The signature does not verify under the provided public key.
    #[error("receipt signature invalid")]
    SignatureInvalid,
    /// The stored signature bytes are not a well-formed Ed25519 signature.
    #[error("malformed signature bytes")]
    MalformedSignature,
}

/// Errors raised while loading key material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The key input was empty.
    #[error("empty key material")]
    Empty,
    /// A prefixed encoding failed to decode.
    #[error("key decode failed: {0}")]
    Decode(String),
    /// No supported encoding matched the input.
    #[error("unrecognized key encoding")]
    UnrecognizedEncoding,
    /// Decoded key material had an unsupported length.
    #[error("unsupported key length: {0}")]
    InvalidLength(usize),
    /// The decoded keypair bytes were internally inconsistent.
    #[error("invalid keypair: {0}")]
    InvalidKeypair(String),
}

// ============================================================================
// SECTION: Signer Capability
// ============================================================================

/// Capability that signs 32-byte digests under a named key.
pub trait Signer: Send + Sync {
    /// Returns the identifier of the active signing key.
    fn key_id(&self) -> &KeyId;

    /// Signs a 32-byte SHA-256 digest.
    ///
    /// # Errors
    ///
    /// Returns [`SignError::InvalidDigestLength`] when `digest` is not 32
    /// bytes, and [`SignError::Backend`] when the backend fails.
    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, SignError>;
}

/// In-process Ed25519 signer.
pub struct LocalSigner {
    /// Identifier of the signing key.
    key_id: KeyId,
    /// Ed25519 signing key; never leaves this struct.
    key: SigningKey,
}

impl LocalSigner {
    /// Creates a signer from an existing Ed25519 signing key.
    #[must_use]
    pub fn new(key_id: KeyId, key: SigningKey) -> Self {
        Self { key_id, key }
    }

    /// Derives a signer from a 32-byte seed.
    #[must_use]
    pub fn from_seed(key_id: KeyId, seed: &[u8; SEED_LEN]) -> Self {
        Self::new(key_id, SigningKey::from_bytes(seed))
    }

    /// Generates a signer with a fresh random key.
    #[must_use]
    pub fn generate(key_id: KeyId) -> Self {
        Self::new(key_id, SigningKey::generate(&mut OsRng))
    }

    /// Returns the verifying half of the key.
    #[must_use]
    pub fn public_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl Signer for LocalSigner {
    fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, SignError> {
        if digest.len() != DIGEST_LEN {
            return Err(SignError::InvalidDigestLength(digest.len()));
        }
        Ok(self.key.sign(digest).to_bytes().to_vec())
    }
}

// ============================================================================
// SECTION: Receipt Verification
// ============================================================================

/// Verifies digest identity and signature of a stored receipt.
///
/// The stored `body_json` already is canonical bytes, so verification
/// recomputes the digest directly over them and checks it against both
/// `body_digest` and `receipt_id` before checking the Ed25519 signature.
///
/// # Errors
///
/// Returns [`VerifyError::DigestMismatch`] when the identity does not match
/// the stored bytes, [`VerifyError::MalformedSignature`] when the signature
/// bytes cannot be parsed, and [`VerifyError::SignatureInvalid`] when the
/// signature does not verify.
pub fn verify_receipt(
    receipt: &StoredReceipt,
    public_key: &VerifyingKey,
) -> Result<(), VerifyError> {
    let digest = digest_bytes(&receipt.body_json);
    let prefixed = digest_with_prefix(&receipt.body_json);
    if receipt.body_digest != prefixed || receipt.receipt_id.as_str() != prefixed {
        return Err(VerifyError::DigestMismatch);
    }

    let signature =
        Signature::from_slice(&receipt.sig).map_err(|_| VerifyError::MalformedSignature)?;
    public_key
        .verify(&digest, &signature)
        .map_err(|_| VerifyError::SignatureInvalid)
}

// ============================================================================
// SECTION: Key Loading
// ============================================================================

/// Loads an Ed25519 signing key from raw or text-encoded material.
///
/// Accepted forms: raw 32-byte seed, raw 64-byte keypair, and `hex:` or
/// `base64:` prefixed text of either, with heuristic hex / base64 /
/// url-safe-base64 fallbacks for unprefixed text.
///
/// # Errors
///
/// Returns [`KeyError`] when no supported encoding matches or the decoded
/// length is not 32 or 64 bytes.
pub fn load_signing_key(raw: &[u8]) -> Result<SigningKey, KeyError> {
    let data = decode_key_material(raw)?;
    match data.len() {
        SEED_LEN => {
            let mut seed = [0_u8; SEED_LEN];
            seed.copy_from_slice(&data);
            Ok(SigningKey::from_bytes(&seed))
        }
        KEYPAIR_LEN => {
            let mut pair = [0_u8; KEYPAIR_LEN];
            pair.copy_from_slice(&data);
            SigningKey::from_keypair_bytes(&pair)
                .map_err(|err| KeyError::InvalidKeypair(err.to_string()))
        }
        other => Err(KeyError::InvalidLength(other)),
    }
}

fn decode_key_material(raw: &[u8]) -> Result<Vec<u8>, KeyError> {
    // Raw binary files are accepted as-is when the length already matches.
    if raw.len() == SEED_LEN || raw.len() == KEYPAIR_LEN {
        return Ok(raw.to_vec());
    }

    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(KeyError::Empty);
    }

    if let Some(rest) = trimmed.strip_prefix("base64:") {
        return BASE64_STANDARD
            .decode(rest)
            .map_err(|err| KeyError::Decode(err.to_string()));
    }
    if let Some(rest) = trimmed.strip_prefix("hex:") {
        return hex_decode(rest).ok_or_else(|| KeyError::Decode("invalid hex".to_string()));
    }

    if let Some(out) = hex_decode(trimmed) {
        return Ok(out);
    }
    if let Ok(out) = BASE64_STANDARD.decode(trimmed) {
        return Ok(out);
    }
    if let Ok(out) = BASE64_URL.decode(trimmed) {
        return Ok(out);
    }
    Err(KeyError::UnrecognizedEncoding)
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    let bytes = text.as_bytes();
    for pair in bytes.chunks_exact(2) {
        let hi = hex_nibble(pair[0])?;
        let lo = hex_nibble(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Some(out)
}

const fn hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
