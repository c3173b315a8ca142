// src/apply/merge.rs
//! Content merges for `merge` write mode and `json-merge` transforms
//!
//! JSON merges are deep: objects merge key by key, arrays are concatenated
//! without duplicates, and any other incoming value replaces the existing
//! one. Text merges append the incoming block unless it is already present.

use crate::error::{Error, Result};
use serde_json::Value;
use std::path::Path;

/// Deep-merge `patch` into `base`; `patch` wins at leaves
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(patch_items)) => {
            for item in patch_items {
                let key = dedup_key(item);
                if !base_items.iter().any(|existing| dedup_key(existing) == key) {
                    base_items.push(item.clone());
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// String form used to compare array items
fn dedup_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse JSON file content; empty content is an empty object
pub fn parse_json(path: &Path, content: &[u8]) -> Result<Value> {
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(content).map_err(|e| Error::Apply {
        step: path.display().to_string(),
        cause: format!("not valid JSON: {}", e),
    })
}

/// Pretty JSON with a trailing newline
pub fn json_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Merge `incoming` file bytes into the `existing` content at `path`
pub fn merge_content(path: &Path, existing: &[u8], incoming: &[u8]) -> Result<Vec<u8>> {
    if is_json(path) {
        let mut base = parse_json(path, existing)?;
        let patch = parse_json(path, incoming)?;
        deep_merge(&mut base, &patch);
        return json_bytes(&base);
    }
    let existing = decode_text(path, existing)?;
    let incoming = decode_text(path, incoming)?;
    Ok(merge_text(existing, incoming).into_bytes())
}

/// Borrow file content as text; binary content is an error, never mangled
pub fn decode_text<'a>(path: &Path, content: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(content).map_err(|e| Error::Apply {
        step: path.display().to_string(),
        cause: format!("not valid UTF-8 text: {}", e),
    })
}

/// Line terminator of `text`: CRLF if any line uses it, else LF
pub fn line_ending(text: &str) -> &'static str {
    if text.contains("\r\n") { "\r\n" } else { "\n" }
}

/// Append `incoming` to `existing` unless it is already contained
///
/// The appended block takes the line ending of `existing`.
pub fn merge_text(existing: &str, incoming: &str) -> String {
    let eol = line_ending(existing);
    let block = incoming.lines().collect::<Vec<_>>().join(eol);
    let block = block.trim_end_matches(['\r', '\n']);

    if block.is_empty() || existing.contains(block) {
        return existing.to_string();
    }

    let mut merged = existing.to_string();
    if !merged.is_empty() && !merged.ends_with('\n') {
        merged.push_str(eol);
    }
    merged.push_str(block);
    merged.push_str(eol);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_deep_merge() {
        let mut base = json!({
            "name": "app",
            "scripts": {"build": "tsc"},
            "files": ["dist", "README.md"],
            "private": false
        });
        let patch = json!({
            "scripts": {"lint": "eslint ."},
            "files": ["dist", "docs"],
            "private": true
        });
        deep_merge(&mut base, &patch);

        assert_eq!(
            base,
            json!({
                "name": "app",
                "scripts": {"build": "tsc", "lint": "eslint ."},
                "files": ["dist", "README.md", "docs"],
                "private": true
            })
        );
    }

    #[test]
    fn test_merge_preserves_key_order() {
        let existing = br#"{"z": 1, "a": {"y": 2}}"#;
        let incoming = br#"{"a": {"b": 3}, "m": 4}"#;
        let merged = merge_content(Path::new("config.json"), existing, incoming).unwrap();
        let text = String::from_utf8(merged).unwrap();

        let z = text.find("\"z\"").unwrap();
        let a = text.find("\"a\"").unwrap();
        let m = text.find("\"m\"").unwrap();
        assert!(z < a && a < m);
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn test_invalid_json_existing() {
        let err = merge_content(Path::new("x.json"), b"{oops", b"{}").err().unwrap();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_merge_text() {
        assert_eq!(merge_text("node_modules\n", "dist\n"), "node_modules\ndist\n");
        assert_eq!(merge_text("a\ndist\n", "dist\n"), "a\ndist\n");
        assert_eq!(merge_text("no newline", "next"), "no newline\nnext\n");
        assert_eq!(merge_text("", "first\n"), "first\n");
    }

    #[test]
    fn test_merge_text_keeps_crlf() {
        assert_eq!(
            merge_text("node_modules\r\n", "dist\ncoverage\n"),
            "node_modules\r\ndist\r\ncoverage\r\n"
        );
        assert_eq!(merge_text("a\r\ndist\r\n", "dist\n"), "a\r\ndist\r\n");
    }

    #[test]
    fn test_merge_content_rejects_binary() {
        let existing = [0x66, 0x6f, 0xff, 0xfe, 0x0a];
        let err = merge_content(Path::new(".gitignore"), &existing, b"dist\n")
            .err()
            .unwrap();
        assert!(matches!(err, Error::Apply { .. }));
        assert!(err.to_string().contains("UTF-8"));
    }
}
