//! Deterministic JSON serialization shared by the TUF signer and the audit
//! log's hash chain. Both need the same byte sequence for the same logical
//! value every time, which `serde_json`'s default `HashMap`-backed `Value`
//! does not guarantee.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Serialize `value` to canonical JSON bytes: object keys sorted
/// lexicographically (recursively), no insignificant whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_value(v);
    serde_json::to_vec(&sorted)
}

fn sort_value(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_value(v))).collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_value).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys_recursively() {
        let a = canonical_json(&json!({"b": 1, "a": {"z": 1, "y": 2}})).unwrap();
        let b = canonical_json(&json!({"a": {"y": 2, "z": 1}, "b": 1})).unwrap();
        assert_eq!(a, b);
        assert_eq!(String::from_utf8(a).unwrap(), r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn distinguishes_different_values() {
        let a = canonical_json(&json!({"a": 1})).unwrap();
        let b = canonical_json(&json!({"a": 2})).unwrap();
        assert_ne!(a, b);
    }
}
