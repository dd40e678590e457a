//! Content hashing and canonical JSON encoding.
//!
//! Every content hash in the kernel is `sha256_hex(stable_stringify(value))`.
//! The canonical form sorts object keys at every depth, so two structures
//! that differ only in key insertion order hash identically.

use serde::Serialize;
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use phasegate_types::KernelError;

/// Placeholder emitted for self-referencing structures in externally
/// produced payloads. Owned `serde_json::Value` trees cannot be cyclic.
pub const CIRCULAR_SENTINEL: &str = "[Circular]";

/// Encode `value` deterministically: object keys sorted, no whitespace.
///
/// ```
/// use phasegate_kernel::hash::stable_stringify;
/// use serde_json::json;
///
/// let a = json!({ "b": 1, "a": [true, null] });
/// let b = json!({ "a": [true, null], "b": 1 });
/// assert_eq!(stable_stringify(&a), r#"{"a":[true,null],"b":1}"#);
/// assert_eq!(stable_stringify(&a), stable_stringify(&b));
/// ```
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Serialize `value` through serde and return its canonical encoding.
///
/// `None` fields marked `skip_serializing_if` are omitted and non-finite
/// floats become `null`.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, KernelError> {
    let tree = serde_json::to_value(value)?;
    Ok(stable_stringify(&tree))
}

/// SHA-256 of `input` as 64 lowercase hex characters.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// `sha256_hex(canonical_json(value))`.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, KernelError> {
    Ok(sha256_hex(&canonical_json(value)?))
}

/// `true` when `s` looks like a SHA-256 hex digest.
pub fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

// Integral floats print without a fraction so `1` and `1.0` encode alike.
fn write_number(out: &mut String, n: &Number) {
    if n.is_i64() || n.is_u64() {
        out.push_str(&n.to_string());
        return;
    }
    match n.as_f64() {
        Some(f) if !f.is_finite() => out.push_str("null"),
        Some(f) if f == 0.0 => out.push('0'),
        Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => out.push_str(&format!("{f:.0}")),
        _ => out.push_str(&n.to_string()),
    }
}

fn write_string(out: &mut String, s: &str) {
    // Serializing a &str cannot fail.
    match serde_json::to_string(s) {
        Ok(encoded) => out.push_str(&encoded),
        Err(_) => out.push_str("\"\""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_recursively() {
        let v = json!({ "z": { "b": 2, "a": 1 }, "a": 0 });
        assert_eq!(stable_stringify(&v), r#"{"a":0,"z":{"a":1,"b":2}}"#);
    }

    #[test]
    fn array_order_is_preserved() {
        let v = json!([3, 1, 2]);
        assert_eq!(stable_stringify(&v), "[3,1,2]");
    }

    #[test]
    fn integral_floats_drop_fraction() {
        let v = json!({ "n": 1.0, "m": 2.5, "z": -0.0 });
        assert_eq!(stable_stringify(&v), r#"{"m":2.5,"n":1,"z":0}"#);
    }

    #[test]
    fn strings_are_json_escaped() {
        let v = json!({ "q": "say \"hi\"\n" });
        assert_eq!(stable_stringify(&v), r#"{"q":"say \"hi\"\n"}"#);
    }

    #[test]
    fn non_finite_floats_encode_as_null() {
        #[derive(Serialize)]
        struct Reading {
            value: f64,
        }
        let encoded = canonical_json(&Reading { value: f64::NAN }).unwrap();
        assert_eq!(encoded, r#"{"value":null}"#);
    }

    #[test]
    fn absent_optional_fields_are_omitted() {
        #[derive(Serialize)]
        struct Sparse {
            present: u8,
            #[serde(skip_serializing_if = "Option::is_none")]
            absent: Option<u8>,
        }
        let encoded = canonical_json(&Sparse { present: 1, absent: None }).unwrap();
        assert_eq!(encoded, r#"{"present":1}"#);
    }

    #[test]
    fn sha256_of_empty_string() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn content_hash_ignores_key_order() {
        let a = json!({ "x": 1, "y": [1, 2] });
        let b = json!({ "y": [1, 2], "x": 1 });
        let ha = content_hash(&a).unwrap();
        assert_eq!(ha, content_hash(&b).unwrap());
        assert!(is_hex64(&ha));
    }

    #[test]
    fn is_hex64_rejects_uppercase_and_wrong_length() {
        assert!(!is_hex64(&"A".repeat(64)));
        assert!(!is_hex64(&"0".repeat(68)));
        assert!(is_hex64(&"0".repeat(64)));
    }
}
