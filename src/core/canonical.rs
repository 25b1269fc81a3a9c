//! Canonical JSON serialisation and content hashing.
//!
//! Freeze hashes (spec.md §6 "Freeze canonicalisation") and every
//! `canonical_hash_hex()` used by the replay checker must be stable across
//! runs and implementations. This module is the single place that defines
//! "canonical": sorted object keys, no insignificant whitespace, UTF-8,
//! and rejection of non-finite floats so that numeric slice metadata
//! never produces a hash that depends on a particular float formatter
//! (the Open Question in spec.md §9, decided in DESIGN.md).

use crate::core::error::CskError;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialise `value` to canonical JSON bytes: `serde_json`'s `Value` map
/// type preserves insertion order by default, so callers must construct
/// values with sorted keys already (every domain record in `model.rs`
/// derives `Serialize` with fields declared in a fixed, documented order
/// and uses `BTreeMap` wherever a map is open-ended). Non-finite floats
/// are rejected rather than silently coerced.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CskError> {
    let json = serde_json::to_value(value)?;
    reject_non_finite(&json)?;
    serde_json::to_vec(&sort_keys(json)).map_err(CskError::from)
}

fn reject_non_finite(value: &serde_json::Value) -> Result<(), CskError> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(CskError::Internal(
                        "non-finite float in canonicalised value".into(),
                    ));
                }
            }
            Ok(())
        }
        serde_json::Value::Array(items) => {
            for i in items {
                reject_non_finite(i)?;
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                reject_non_finite(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Recursively rebuild a JSON value with object keys sorted lexically.
fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, serde_json::Value> =
                std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k, sort_keys(v));
            }
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_keys).collect())
        }
        other => other,
    }
}

/// SHA-256 of the canonical JSON serialisation of `value`.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> Result<String, CskError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(sha256_hex(&bytes))
}

/// SHA-256 of raw bytes (used for byte-exact `plan.md` hashing).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        b: i32,
        a: String,
    }

    #[test]
    fn canonical_hash_is_stable_regardless_of_field_order_in_source() {
        let s1 = Sample { b: 1, a: "x".into() };
        let h1 = canonical_hash_hex(&s1).unwrap();
        let h2 = canonical_hash_hex(&s1).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn canonical_json_sorts_object_keys() {
        let value = serde_json::json!({"z": 1, "a": 2});
        let bytes = canonical_json_bytes(&value).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.find("\"a\"").unwrap() < text.find("\"z\"").unwrap());
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn non_finite_float_is_rejected() {
        let value = serde_json::json!({"x": f64::NAN});
        // serde_json represents NaN as Null when serializing from f64 directly via json! macro
        // so construct via Number path instead.
        let _ = value;
        #[derive(Serialize)]
        struct WithFloat {
            x: f64,
        }
        let bad = WithFloat { x: f64::INFINITY };
        assert!(canonical_json_bytes(&bad).is_err());
    }
}
