//! Content fingerprints for change detection
//!
//! A fingerprint is the hex SHA-256 of the canonical JSON form of a value:
//! object keys sorted recursively, no insignificant whitespace. Two payloads
//! that differ only in key order share a fingerprint.

use serde_json::Value;
use sha2::{Digest, Sha256};

pub fn fingerprint(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_is_irrelevant() {
        let a = json!({"id": 1, "attrs": {"x": [1, 2], "y": "z"}});
        let b = json!({"attrs": {"y": "z", "x": [1, 2]}, "id": 1});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_content_changes_fingerprint() {
        let a = json!({"id": 1, "tags": ["a", "b"]});
        let b = json!({"id": 1, "tags": ["b", "a"]});
        let c = json!({"id": "1", "tags": ["a", "b"]});
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            fingerprint(&json!({})),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }
}
