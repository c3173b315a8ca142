// src/apply/transform.rs
//! In-place edits of existing files
//!
//! - `json-merge`: deep-merge the spec object into the parsed file
//! - `text-insert`: insert the spec text before/after the first line holding
//!   the anchor, or append when the anchor is absent
//! - `line-replace`: replace every line matching the anchor regex
//!
//! Text edits keep the file's line endings and refuse content that is not
//! UTF-8.

use super::merge::{decode_text, deep_merge, json_bytes, line_ending, parse_json};
use crate::error::{Error, Result};
use crate::manifest::{InsertPosition, TransformKind};
use regex::Regex;
use serde_json::Value;
use std::path::Path;

/// Apply one transform to `content`, returning the new bytes
pub fn apply_transform(
    path: &Path,
    content: &[u8],
    kind: TransformKind,
    spec: &Value,
    anchor: Option<&str>,
    position: InsertPosition,
) -> Result<Vec<u8>> {
    match kind {
        TransformKind::JsonMerge => {
            let mut value = parse_json(path, content)?;
            deep_merge(&mut value, spec);
            json_bytes(&value)
        }
        TransformKind::TextInsert => {
            let text = decode_text(path, content)?;
            Ok(text_insert(text, &spec_text(spec), anchor, position).into_bytes())
        }
        TransformKind::LineReplace => {
            let anchor = anchor.ok_or_else(|| Error::Apply {
                step: path.display().to_string(),
                cause: "line-replace needs an anchor".to_string(),
            })?;
            let pattern = Regex::new(anchor).map_err(|e| Error::Apply {
                step: path.display().to_string(),
                cause: format!("invalid anchor regex: {}", e),
            })?;
            let text = decode_text(path, content)?;
            Ok(line_replace(text, &pattern, &spec_text(spec)).into_bytes())
        }
    }
}

fn spec_text(spec: &Value) -> String {
    match spec {
        Value::String(s) => s.clone(),
        Value::Array(lines) => lines
            .iter()
            .map(|l| l.as_str().map(str::to_string).unwrap_or_else(|| l.to_string()))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Line-oriented insert; a no-op when the block is already present
pub fn text_insert(content: &str, insert: &str, anchor: Option<&str>, position: InsertPosition) -> String {
    let eol = line_ending(content);
    let block = insert.lines().collect::<Vec<_>>().join(eol);
    let block = block.trim_end_matches(['\r', '\n']);
    if block.is_empty() || content.contains(block) {
        return content.to_string();
    }

    let trailing_newline = content.ends_with('\n') || content.is_empty();
    let mut lines: Vec<&str> = content.lines().collect();
    let at = anchor.and_then(|a| lines.iter().position(|line| line.contains(a)));

    match (at, position) {
        (Some(i), InsertPosition::Before) => lines.insert(i, block),
        (Some(i), InsertPosition::After) => lines.insert(i + 1, block),
        (None, _) => lines.push(block),
    }

    let mut out = lines.join(eol);
    if trailing_newline || at.is_none() {
        out.push_str(eol);
    }
    out
}

/// Replace every line matching `pattern` with `replacement`
pub fn line_replace(content: &str, pattern: &Regex, replacement: &str) -> String {
    let eol = line_ending(content);
    let mut out = content
        .lines()
        .map(|line| if pattern.is_match(line) { replacement } else { line })
        .collect::<Vec<_>>()
        .join(eol);
    if content.ends_with('\n') {
        out.push_str(eol);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_text_insert_after_anchor() {
        let content = "# Project\n## Usage\nrun it\n";
        let out = text_insert(content, "## Install\n", Some("# Project"), InsertPosition::After);
        assert_eq!(out, "# Project\n## Install\n## Usage\nrun it\n");

        let again = text_insert(&out, "## Install\n", Some("# Project"), InsertPosition::After);
        assert_eq!(again, out);
    }

    #[test]
    fn test_text_insert_before_and_missing_anchor() {
        let content = "a\nb\n";
        assert_eq!(
            text_insert(content, "x", Some("b"), InsertPosition::Before),
            "a\nx\nb\n"
        );
        assert_eq!(
            text_insert(content, "x", Some("zzz"), InsertPosition::After),
            "a\nb\nx\n"
        );
        assert_eq!(text_insert("", "x", None, InsertPosition::After), "x\n");
    }

    #[test]
    fn test_line_replace() {
        let pattern = Regex::new(r"^version\s*=").unwrap();
        let content = "name = demo\nversion = 1\nversion=2\n";
        assert_eq!(
            line_replace(content, &pattern, "version = 3"),
            "name = demo\nversion = 3\nversion = 3\n"
        );
    }

    #[test]
    fn test_text_edits_keep_crlf() {
        let content = "# Project\r\n## Usage\r\nversion = 1\r\n";
        assert_eq!(
            text_insert(content, "## Install\nnpm i\n", Some("# Project"), InsertPosition::After),
            "# Project\r\n## Install\r\nnpm i\r\n## Usage\r\nversion = 1\r\n"
        );

        let pattern = Regex::new(r"^version\s*=").unwrap();
        assert_eq!(
            line_replace(content, &pattern, "version = 2"),
            "# Project\r\n## Usage\r\nversion = 2\r\n"
        );
    }

    #[test]
    fn test_text_transforms_reject_invalid_utf8() {
        let content = b"caf\xe9\nend\n";
        for kind in [TransformKind::TextInsert, TransformKind::LineReplace] {
            let err = apply_transform(
                Path::new("notes.txt"),
                content,
                kind,
                &json!("x"),
                Some("end"),
                InsertPosition::After,
            )
            .err()
            .unwrap();
            assert!(matches!(err, Error::Apply { .. }), "{:?}", kind);
            assert!(err.to_string().contains("UTF-8"));
        }
    }

    #[test]
    fn test_json_merge_transform() {
        let out = apply_transform(
            Path::new("package.json"),
            br#"{"name":"app","keywords":["cli"]}"#,
            TransformKind::JsonMerge,
            &json!({"keywords": ["cli", "gitvan"], "scripts": {"x": "y"}}),
            None,
            InsertPosition::After,
        )
        .unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            value,
            json!({"name": "app", "keywords": ["cli", "gitvan"], "scripts": {"x": "y"}})
        );
    }

    #[test]
    fn test_line_replace_requires_anchor() {
        let err = apply_transform(
            Path::new("a.txt"),
            b"x\n",
            TransformKind::LineReplace,
            &json!("y"),
            None,
            InsertPosition::After,
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("anchor"));
    }
}
