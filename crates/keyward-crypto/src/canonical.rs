//! Payload normal form for the audit hash chain.
//!
//! An audit entry's hash covers its JSON payload. The payload is rewritten
//! here with object keys in byte order and no whitespace, so a caller that
//! rebuilds the same payload with different key order (or a store that
//! reorders keys) still reproduces the entry's hash during verification.
//! Strings keep serde_json escaping: control characters, NUL included,
//! come out as `\u00XX` and never appear raw in the hash input.

use serde_json::Value;

use crate::error::CryptoError;

/// Canonical text of `value`.
pub fn canonical_json(value: &Value) -> Result<String, CryptoError> {
    let mut out = String::new();
    write_value(&mut out, value)?;
    Ok(out)
}

fn write_value(out: &mut String, value: &Value) -> Result<(), CryptoError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            if n.as_f64().is_some_and(|f| !f.is_finite()) {
                return Err(CryptoError::NonFiniteNumber);
            }
            out.push_str(&n.to_string());
        }
        Value::String(s) => write_str(out, s)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item)?;
            }
            out.push(']');
        }
        Value::Object(fields) => {
            let mut sorted: Vec<(&String, &Value)> = fields.iter().collect();
            sorted.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, field)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_str(out, key)?;
                out.push(':');
                write_value(out, field)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_str(out: &mut String, s: &str) -> Result<(), CryptoError> {
    let quoted = serde_json::to_string(s).map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    out.push_str(&quoted);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_output() {
        let written = json!({"role": "admin", "grant": {"scope": "billing", "by": "ops"}, "at": 3});
        let reordered = json!({"at": 3, "grant": {"by": "ops", "scope": "billing"}, "role": "admin"});
        let canonical = canonical_json(&written).unwrap();
        assert_eq!(canonical, canonical_json(&reordered).unwrap());
        assert_eq!(canonical, r#"{"at":3,"grant":{"by":"ops","scope":"billing"},"role":"admin"}"#);
    }

    #[test]
    fn arrays_keep_their_order() {
        let canonical = canonical_json(&json!({"changed": ["email", "phone", {"z": 0, "a": null}]})).unwrap();
        assert_eq!(canonical, r#"{"changed":["email","phone",{"a":null,"z":0}]}"#);
    }

    #[test]
    fn scalars_and_empty_containers() {
        assert_eq!(canonical_json(&Value::Null).unwrap(), "null");
        assert_eq!(canonical_json(&json!(false)).unwrap(), "false");
        assert_eq!(canonical_json(&json!(-7)).unwrap(), "-7");
        assert_eq!(canonical_json(&json!(1.5)).unwrap(), "1.5");
        assert_eq!(canonical_json(&json!({"a": {}, "b": []})).unwrap(), r#"{"a":{},"b":[]}"#);
    }

    #[test]
    fn keys_sort_by_bytes() {
        let canonical = canonical_json(&json!({"b": 1, "B": 2, "é": 3, "a": 4})).unwrap();
        assert_eq!(canonical, r#"{"B":2,"a":4,"b":1,"é":3}"#);
    }

    #[test]
    fn control_characters_are_escaped() {
        let canonical = canonical_json(&json!({"note": "a\u{0}b\nc\"d"})).unwrap();
        assert!(!canonical.contains('\0'));
        assert_eq!(canonical, r#"{"note":"a\u0000b\nc\"d"}"#);
    }
}
