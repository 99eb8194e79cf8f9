//! Canonical parameter hashing for idempotency keys (§4.5).
//!
//! The hash is computed over a recursively key-sorted JSON rendering so
//! that field order in the caller's request never changes the key.

use serde_json::Value;
use sha2::{Digest, Sha256};

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// `sha256(job_type + "\n" + canonical_json(params))`, hex-encoded.
pub fn canonical_hash(job_type: &str, params: &Value) -> String {
    let canonical = canonicalize(params);
    let rendered = serde_json::to_string(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(job_type.as_bytes());
    hasher.update(b"\n");
    hasher.update(rendered.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = serde_json::json!({"query": "rust", "costPreference": "low"});
        let b = serde_json::json!({"costPreference": "low", "query": "rust"});
        assert_eq!(canonical_hash("research", &a), canonical_hash("research", &b));
    }

    #[test]
    fn different_params_hash_differently() {
        let a = serde_json::json!({"query": "rust"});
        let b = serde_json::json!({"query": "python"});
        assert_ne!(canonical_hash("research", &a), canonical_hash("research", &b));
    }

    #[test]
    fn different_job_types_hash_differently_for_same_params() {
        let p = serde_json::json!({"query": "rust"});
        assert_ne!(canonical_hash("research", &p), canonical_hash("other", &p));
    }
}
