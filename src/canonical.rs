//! Canonical JSON encoding and SHA-256 hashing (§4.1/A). Every hash computed
//! anywhere else in this crate goes through `sha256_hex`/`sha256_hex_of_str`.
//!
//! Grounded on the teacher's `reasoning/critic_audit.rs::sha256_hex` helper,
//! generalized into a standalone canonicalization module since this crate
//! needs it in four places (audit, replay store, arbitration tie-break,
//! incident case ids) rather than one.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Returns a value with all object keys sorted lexicographically,
/// recursively. Arrays keep their element order. Scalars pass through
/// unchanged.
pub fn canonicalize(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Deterministic string form of a canonicalized value. Non-finite numbers
/// are not representable in `serde_json::Value` (they're rejected at
/// construction), so callers that need "Infinity"/"NaN" textual forms
/// should pre-encode those fields as strings before calling this function;
/// every caller in this crate does so (see `risk.rs`, `canonical` tests).
pub fn stable_string(v: &Value) -> String {
    // `serde_json` preserves `Map` (BTreeMap-backed, under the
    // `preserve_order` feature off) insertion order; since `canonicalize`
    // already sorted keys, straightforward serialization is stable.
    serde_json::to_string(&canonicalize(v)).expect("canonical value always serializes")
}

pub fn sha256_hex_of_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn sha256_hex(v: &Value) -> String {
    sha256_hex_of_str(&stable_string(v))
}

/// Encodes a byte array the way canonical JSON requires: an array of
/// numeric octets, not a base64/hex string.
pub fn bytes_to_value(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|&b| Value::from(b as u64)).collect())
}
