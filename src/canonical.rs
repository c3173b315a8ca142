// src/canonical.rs

//! Canonical JSON encoding
//!
//! The single serialization used for every hash input: object keys sorted
//! by code point at every depth, array order preserved, no insignificant
//! whitespace, integers without a decimal point and floats in their
//! shortest round-trip form.
//!
//! Keys are sorted explicitly rather than relying on `serde_json::Map`
//! ordering, which changes when any crate in the build enables
//! `preserve_order`.

use crate::error::Result;
use crate::hash;
use serde::Serialize;
use serde_json::Value;

/// Encode any serializable value canonically
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(value_to_canonical_bytes(&value))
}

/// Encode a JSON value canonically
pub fn value_to_canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    write_value(value, &mut out);
    out
}

/// Canonical form as a string
pub fn to_canonical_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = to_canonical_bytes(value)?;
    // Encoder only emits UTF-8 produced by serde_json
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// `hex(SHA-256(canonical(value)))`
pub fn hash_value<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(hash::sha256(&to_canonical_bytes(value)?))
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                write_value(item, out);
            }
            out.push(b'}');
        }
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    // serde_json applies the standard JSON escape set
    match serde_json::to_vec(s) {
        Ok(encoded) => out.extend_from_slice(&encoded),
        Err(_) => out.extend_from_slice(b"\"\""),
    }
}
