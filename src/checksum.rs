//! Canonical fingerprints for schema documents

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA256 checksum over the canonical form of a schema document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from JSON value (canonicalized)
    pub fn from_json(value: &Value) -> Self {
        Self::from_bytes(canonical_json(value).as_bytes())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that JSON value matches this checksum
    pub fn verify_json(&self, value: &Value) -> bool {
        Self::from_json(value) == *self
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Render a JSON value with object keys sorted and no insignificant whitespace.
///
/// Key order of the source document never changes the output, regardless of
/// whether `serde_json` was built with `preserve_order`.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
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

    #[test]
    fn test_checksum_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"type": "object", "title": "Person"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{ "title":"Person","type":"object" }"#).unwrap();
        assert_eq!(Checksum::from_json(&a), Checksum::from_json(&b));
    }

    #[test]
    fn test_checksum_different_content() {
        let a = serde_json::json!({"properties": {"firstname": {"type": "string"}}});
        let b = serde_json::json!({"properties": {"lastname": {"type": "string"}}});
        assert_ne!(Checksum::from_json(&a), Checksum::from_json(&b));
    }

    #[test]
    fn test_canonical_nesting() {
        let value = serde_json::json!({"b": [1, {"d": null, "c": "x"}], "a": true});
        assert_eq!(canonical_json(&value), r#"{"a":true,"b":[1,{"c":"x","d":null}]}"#);
    }

    #[test]
    fn test_checksum_verification() {
        let value = serde_json::json!({"type": "object"});
        let checksum = Checksum::from_json(&value);
        assert!(checksum.verify_json(&value));
        assert!(!checksum.verify_json(&serde_json::json!({"type": "string"})));
    }
}
