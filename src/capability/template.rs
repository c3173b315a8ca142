// src/capability/template.rs

//! Template rendering capability
//!
//! The engine treats rendering as opaque: `render(template, context) -> bytes`.
//! [`BraceRenderer`] is the stock implementation, substituting
//! `{{ path.to.value }}` with an optional single filter
//! (`{{ name | slug }}`, `upper`, `lower`).

use crate::error::{Error, Result};
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;

/// Renders a template source against a JSON context
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> Result<Vec<u8>>;
}

/// `{{ path | filter }}` substitution renderer
#[derive(Debug, Default, Clone, Copy)]
pub struct BraceRenderer;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*(?:\|\s*([a-z]+)\s*)?\}\}")
            .unwrap_or_else(|e| panic!("placeholder regex is invalid: {e}"))
    })
}

impl TemplateRenderer for BraceRenderer {
    fn render(&self, template: &str, context: &Value) -> Result<Vec<u8>> {
        let mut failure: Option<Error> = None;

        let rendered = placeholder_regex().replace_all(template, |caps: &Captures| {
            let path = &caps[1];
            let Some(value) = lookup(context, path) else {
                failure.get_or_insert_with(|| {
                    Error::Template(format!("undefined variable '{}'", path))
                });
                return String::new();
            };

            let text = value_to_text(value);
            match caps.get(2).map(|m| m.as_str()) {
                None => text,
                Some("slug") => slug(&text),
                Some("upper") => text.to_uppercase(),
                Some("lower") => text.to_lowercase(),
                Some(other) => {
                    failure.get_or_insert_with(|| {
                        Error::Template(format!("unknown filter '{}'", other))
                    });
                    String::new()
                }
            }
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(rendered.into_owned().into_bytes()),
        }
    }
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(context, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Lowercase, ASCII-alphanumeric words joined by `-`
pub fn slug(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    out
}
