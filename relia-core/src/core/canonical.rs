// relia-core/src/core/canonical.rs
// ============================================================================
// Module: Relia Canonical Encoding
// Description: Deterministic JSON canonicalization and SHA-256 digests.
// Purpose: Make every signable record reproducible bit for bit.
// Dependencies: serde, serde_json, sha2, unicode-normalization
// ============================================================================

//! ## Overview
//! Relia identifies records by the SHA-256 digest of their canonical byte
//! encoding, so the encoding must be a pure function of the logical value.
//! Mappings are emitted with NFC-normalized keys in byte-lexicographic order,
//! null-valued mapping entries are stripped, strings are NFC-normalized and
//! JSON-escaped, and integers render as shortest decimal. Floating-point
//! values are rejected outright: digests over floats are not portable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Number;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while canonicalizing a value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonError {
    /// A floating-point number was encountered.
    #[error("float values are not allowed")]
    FloatNotAllowed,
    /// A mapping key was not a string.
    #[error("map keys must be strings")]
    NonStringMapKey,
    /// Two mapping keys normalized to the same NFC form.
    #[error("normalized map key collision: {0}")]
    KeyCollision(String),
    /// The value contains a kind the canonical form cannot express.
    #[error("unsupported type for canonicalization: {0}")]
    UnsupportedType(String),
}

// ============================================================================
// SECTION: Canonical Encoding
// ============================================================================

/// Encodes a JSON value as canonical bytes.
///
/// Mapping entries whose value is `null` are omitted; `null` elements inside
/// sequences are preserved.
///
/// # Errors
///
/// Returns [`CanonError`] when the value contains floats or an unencodable
/// kind.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, CanonError> {
    let mut out = Vec::new();
    write_value(&mut out, value)?;
    Ok(out)
}

/// Serializes a value to JSON and encodes it canonically.
///
/// # Errors
///
/// Returns [`CanonError::NonStringMapKey`] when the value carries a mapping
/// with non-string keys, and [`CanonError`] for the other §canonical
/// violations.
pub fn canonical_from<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonError> {
    let json = serde_json::to_value(value).map_err(classify_serialize_error)?;
    canonical_bytes(&json)
}

fn classify_serialize_error(err: serde_json::Error) -> CanonError {
    let message = err.to_string();
    if message.contains("key must be a string") {
        CanonError::NonStringMapKey
    } else {
        CanonError::UnsupportedType(message)
    }
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), CanonError> {
    match value {
        Value::Null => {
            buf.extend_from_slice(b"null");
            Ok(())
        }
        Value::Bool(true) => {
            buf.extend_from_slice(b"true");
            Ok(())
        }
        Value::Bool(false) => {
            buf.extend_from_slice(b"false");
            Ok(())
        }
        Value::Number(number) => write_number(buf, number),
        Value::String(text) => write_string(buf, text),
        Value::Array(items) => write_sequence(buf, items),
        Value::Object(map) => write_mapping(buf, map),
    }
}

fn write_number(buf: &mut Vec<u8>, number: &Number) -> Result<(), CanonError> {
    let rendered = number.to_string();
    if number.is_f64() || rendered.contains(['.', 'e', 'E']) {
        return Err(CanonError::FloatNotAllowed);
    }
    buf.extend_from_slice(rendered.as_bytes());
    Ok(())
}

fn write_string(buf: &mut Vec<u8>, text: &str) -> Result<(), CanonError> {
    let normalized: String = text.nfc().collect();
    let encoded = serde_json::to_string(&normalized)
        .map_err(|err| CanonError::UnsupportedType(err.to_string()))?;
    buf.extend_from_slice(encoded.as_bytes());
    Ok(())
}

fn write_sequence(buf: &mut Vec<u8>, items: &[Value]) -> Result<(), CanonError> {
    buf.push(b'[');
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            buf.push(b',');
        }
        write_value(buf, item)?;
    }
    buf.push(b']');
    Ok(())
}

fn write_mapping(
    buf: &mut Vec<u8>,
    map: &serde_json::Map<String, Value>,
) -> Result<(), CanonError> {
    let mut entries: BTreeMap<String, &Value> = BTreeMap::new();
    for (key, value) in map {
        if value.is_null() {
            continue;
        }
        let normalized: String = key.nfc().collect();
        if entries.insert(normalized.clone(), value).is_some() {
            return Err(CanonError::KeyCollision(normalized));
        }
    }

    buf.push(b'{');
    for (index, (key, value)) in entries.iter().enumerate() {
        if index > 0 {
            buf.push(b',');
        }
        write_string(buf, key)?;
        buf.push(b':');
        write_value(buf, value)?;
    }
    buf.push(b'}');
    Ok(())
}

// ============================================================================
// SECTION: Digests
// ============================================================================

/// Returns the raw SHA-256 digest of the provided bytes.
#[must_use]
pub fn digest_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Returns the SHA-256 digest of the provided bytes as lowercase hex.
#[must_use]
pub fn digest_hex(data: &[u8]) -> String {
    hex_encode(&digest_bytes(data))
}

/// Returns the SHA-256 digest with the `sha256:` identity prefix.
#[must_use]
pub fn digest_with_prefix(data: &[u8]) -> String {
    format!("sha256:{}", digest_hex(data))
}

/// Encodes bytes as a lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}
