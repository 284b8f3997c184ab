//! Content digests over normalized spec values.
//!
//! Two specs with equal digests are treated as equivalent by the planner, so
//! the serialization must be canonical: object keys sorted, nulls dropped,
//! no insignificant whitespace. The digest is `sha256:<64 hex>` over that
//! canonical form.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Computes the canonical digest of any serializable spec.
pub fn digest_of<T: Serialize>(spec: &T) -> String {
    let value = serde_json::to_value(spec).expect("spec serialization is infallible");
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);
    let hash = Sha256::digest(canonical.as_bytes());
    format!("sha256:{}", hex::encode(hash))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            let mut first = true;
            for key in keys {
                let v = &map[key];
                if v.is_null() {
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                out.push_str(
                    &serde_json::to_string(key).expect("string serialization is infallible"),
                );
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn digest_is_key_order_independent() {
        let a = json!({"version": "1.0.0", "strategy": "download"});
        let b = json!({"strategy": "download", "version": "1.0.0"});
        assert_eq!(digest_of(&a), digest_of(&b));
    }

    #[test]
    fn digest_ignores_null_fields() {
        let a = json!({"version": "1.0.0", "package": null});
        let b = json!({"version": "1.0.0"});
        assert_eq!(digest_of(&a), digest_of(&b));
    }

    #[test]
    fn digest_distinguishes_values() {
        let a = json!({"version": "1.0.0"});
        let b = json!({"version": "1.0.1"});
        assert_ne!(digest_of(&a), digest_of(&b));
    }

    #[test]
    fn digest_has_expected_shape() {
        let d = digest_of(&json!({"a": 1}));
        assert!(d.starts_with("sha256:"));
        assert_eq!(d.len(), "sha256:".len() + 64);
    }
}
