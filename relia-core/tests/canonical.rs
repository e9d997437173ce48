// relia-core/tests/canonical.rs
// ============================================================================
// Module: Canonical Encoding Tests
// Description: Tests for deterministic canonicalization and digests.
// ============================================================================
//! ## Overview
//! Validates byte-level determinism, null stripping, float rejection, and
//! NFC key collision behavior.

use proptest::prelude::*;
use serde_json::json;

use relia_core::CanonError;
use relia_core::canonical_bytes;
use relia_core::canonical_from;
use relia_core::digest_with_prefix;

// ============================================================================
// SECTION: Determinism
// ============================================================================

/// Tests that encoding is independent of key insertion order.
#[test]
fn test_canonical_is_order_independent() {
    let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
    let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
    assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
}

/// Tests that re-encoding yields byte-identical output and a stable digest.
#[test]
fn test_digest_is_stable_across_runs() {
    let value = json!({
        "schema": "relia.context.v0.1",
        "inputs": {"action": "terraform.apply", "env": "dev"},
        "tags": ["a", "b", "c"],
        "count": 42,
    });
    let first = canonical_bytes(&value).unwrap();
    let second = canonical_bytes(&value).unwrap();
    assert_eq!(first, second);
    assert_eq!(digest_with_prefix(&first), digest_with_prefix(&second));
    assert!(digest_with_prefix(&first).starts_with("sha256:"));
}

proptest! {
    /// Encoding an arbitrary tree twice yields identical bytes.
    #[test]
    fn prop_canonical_deterministic(keys in proptest::collection::vec("[a-z]{1,8}", 1..8), values in proptest::collection::vec(0_i64..1000, 1..8)) {
        let mut map = serde_json::Map::new();
        for (key, value) in keys.iter().zip(values.iter()) {
            map.insert(key.clone(), json!(value));
        }
        let value = serde_json::Value::Object(map);
        prop_assert_eq!(canonical_bytes(&value).unwrap(), canonical_bytes(&value).unwrap());
    }
}

// ============================================================================
// SECTION: Null Handling
// ============================================================================

/// Tests that null mapping values vanish while sequence nulls survive.
#[test]
fn test_null_stripping_rules() {
    let value = json!({
        "present": 1,
        "absent": null,
        "nested": {"keep": true, "drop": null},
        "items": [null, 1, null],
    });
    let bytes = canonical_bytes(&value).unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert_eq!(
        text,
        r#"{"items":[null,1,null],"nested":{"keep":true},"present":1}"#
    );
}

/// Tests that empty sequences stay `[]` and omitted options disappear.
#[test]
fn test_empty_sequence_encoding() {
    let value = json!({"list": [], "gone": null});
    assert_eq!(canonical_bytes(&value).unwrap(), br#"{"list":[]}"#);
}

// ============================================================================
// SECTION: Rejections
// ============================================================================

/// Tests that floats anywhere in the tree are rejected.
#[test]
fn test_floats_rejected_everywhere() {
    assert_eq!(
        canonical_bytes(&json!(1.5)),
        Err(CanonError::FloatNotAllowed)
    );
    assert_eq!(
        canonical_bytes(&json!({"deep": {"ratio": 0.1}})),
        Err(CanonError::FloatNotAllowed)
    );
    assert_eq!(
        canonical_bytes(&json!([1, 2.0])),
        Err(CanonError::FloatNotAllowed)
    );
}

/// Tests that non-string map keys are classified distinctly.
#[test]
fn test_non_string_map_keys_rejected() {
    let mut map = std::collections::BTreeMap::new();
    map.insert((1_u8, 2_u8), "x");
    assert_eq!(canonical_from(&map), Err(CanonError::NonStringMapKey));
}

/// Tests that two keys normalizing to the same NFC form collide.
#[test]
fn test_nfc_key_collision_rejected() {
    // U+00E9 vs U+0065 U+0301 both normalize to the same code point.
    let precomposed = "caf\u{00e9}";
    let decomposed = "cafe\u{0301}";
    assert_ne!(precomposed, decomposed);

    let mut map = serde_json::Map::new();
    map.insert(precomposed.to_string(), json!(1));
    map.insert(decomposed.to_string(), json!(2));
    let value = serde_json::Value::Object(map);

    assert!(matches!(
        canonical_bytes(&value),
        Err(CanonError::KeyCollision(_))
    ));
}

/// Tests that NFC-distinct keys sort by their normalized bytes.
#[test]
fn test_nfc_normalization_applies_to_strings() {
    let value = json!({"k": "cafe\u{0301}"});
    let bytes = canonical_bytes(&value).unwrap();
    assert_eq!(String::from_utf8(bytes).unwrap(), "{\"k\":\"caf\u{00e9}\"}");
}
