//! Canonical JSON encoding used for block hashing.
//!
//! Rules: compact output, object keys sorted by byte order at every level,
//! integers in plain decimal, standard JSON string escaping.  Floating-point
//! numbers, non-string map keys and nesting deeper than [`MAX_DEPTH`] are
//! rejected with [`LedgerError::Serialization`].

use serde::Serialize;
use serde_json::Value;

use crate::error::{LedgerError, Result, ResultExt as _};

/// Maximum nesting of arrays/objects inside an encoded value.
pub const MAX_DEPTH: usize = 32;

/// Convert `value` into a JSON tree that is known to be canonically encodable.
pub fn to_canonical_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    let v = serde_json::to_value(value).ctx_serialization("encode payload")?;
    check_encodable(&v, 0)?;
    Ok(v)
}

/// Canonical bytes of any serializable value.
pub fn to_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let v = to_canonical_value(value)?;
    let mut out = Vec::with_capacity(128);
    write_value(&mut out, &v)?;
    Ok(out)
}

/// Append the canonical encoding of an already-checked value to `out`.
pub(crate) fn write_value(out: &mut Vec<u8>, v: &Value) -> Result<()> {
    match v {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if n.is_f64() {
                return Err(LedgerError::Serialization(format!(
                    "floating-point value {n} has no canonical encoding"
                )));
            }
            out.extend_from_slice(n.to_string().as_bytes());
        }
        Value::String(s) => write_str(out, s)?,
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (i, (k, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_str(out, k)?;
                out.push(b':');
                write_value(out, item)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    serde_json::to_writer(&mut *out, s).ctx_serialization("encode string")
}

fn check_encodable(v: &Value, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(LedgerError::Serialization(format!(
            "payload nesting exceeds {MAX_DEPTH} levels"
        )));
    }
    match v {
        Value::Number(n) if n.is_f64() => Err(LedgerError::Serialization(format!(
            "floating-point value {n} has no canonical encoding"
        ))),
        Value::Array(items) => items.iter().try_for_each(|i| check_encodable(i, depth + 1)),
        Value::Object(map) => map.values().try_for_each(|i| check_encodable(i, depth + 1)),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn keys_sorted_at_every_level() {
        let v = json!({"b": 1, "a": {"z": true, "m": null}, "c": [ {"y": 2, "x": 1} ]});
        let bytes = to_canonical_json(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"m":null,"z":true},"b":1,"c":[{"x":1,"y":2}]}"#
        );
    }

    #[test]
    fn field_declaration_order_does_not_matter() {
        #[derive(Serialize)]
        struct Ab {
            a: u64,
            b: &'static str,
        }
        #[derive(Serialize)]
        struct Ba {
            b: &'static str,
            a: u64,
        }
        assert_eq!(
            to_canonical_json(&Ab { a: 1, b: "x" }).unwrap(),
            to_canonical_json(&Ba { b: "x", a: 1 }).unwrap()
        );
    }

    #[test]
    fn strings_are_escaped() {
        let bytes = to_canonical_json(&json!({"k": "quote\" and \\ and \n"})).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"k":"quote\" and \\ and \n"}"#
        );
    }

    #[test]
    fn floats_rejected() {
        let err = to_canonical_json(&json!({"temp": 4.5})).unwrap_err();
        assert!(matches!(err, LedgerError::Serialization(_)));
    }

    #[test]
    fn non_string_keys_rejected() {
        let mut m: BTreeMap<(u8, u8), u8> = BTreeMap::new();
        m.insert((1, 2), 3);
        let err = to_canonical_json(&m).unwrap_err();
        assert!(matches!(err, LedgerError::Serialization(_)));
    }

    #[test]
    fn excessive_nesting_rejected() {
        let mut v = json!(0);
        for _ in 0..(MAX_DEPTH + 2) {
            v = json!([v]);
        }
        let err = to_canonical_json(&v).unwrap_err();
        assert!(err.to_string().contains("nesting"));
    }

    #[test]
    fn negative_and_large_integers_plain_decimal() {
        let bytes = to_canonical_json(&json!([-5, u64::MAX])).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            format!("[-5,{}]", u64::MAX)
        );
    }
}
