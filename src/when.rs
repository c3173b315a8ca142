// src/when.rs

//! `when` expressions on provided items
//!
//! Grammar:
//!
//! ```text
//! expr    := ident ("==" literal | "!=" literal | "?")
//! ident   := "mode" | "inputs." KEY
//! literal := '"' chars '"' | "'" chars "'" | bare-word
//! ```
//!
//! `inputs.KEY?` is true when the input resolved to a non-null value.
//! Literals compare against the value's string form (`true`, `8080`,
//! `existing-tree`). Anything else is rejected with `PlanError{when-expr}`.

use crate::error::{Error, PlanErrorKind, Result};
use crate::mode::Mode;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ident {
    Mode,
    Input(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhenExpr {
    Eq(Ident, String),
    Ne(Ident, String),
    Present(Ident),
}

fn when_error(expr: &str, reason: &str) -> Error {
    Error::Plan {
        kind: PlanErrorKind::WhenExpr,
        message: format!("'{}': {}", expr, reason),
    }
}

impl WhenExpr {
    pub fn parse(source: &str) -> Result<Self> {
        let expr = source.trim();
        if expr.is_empty() {
            return Err(when_error(source, "empty expression"));
        }

        if let Some(ident) = expr.strip_suffix('?') {
            return Ok(WhenExpr::Present(parse_ident(source, ident.trim())?));
        }

        let (lhs, rhs, negated) = if let Some((l, r)) = expr.split_once("!=") {
            (l, r, true)
        } else if let Some((l, r)) = expr.split_once("==") {
            (l, r, false)
        } else {
            return Err(when_error(source, "expected '==', '!=' or '?'"));
        };

        let ident = parse_ident(source, lhs.trim())?;
        let literal = parse_literal(source, rhs.trim())?;
        Ok(if negated {
            WhenExpr::Ne(ident, literal)
        } else {
            WhenExpr::Eq(ident, literal)
        })
    }

    pub fn evaluate(&self, mode: Mode, inputs: &Map<String, Value>) -> bool {
        match self {
            WhenExpr::Present(Ident::Mode) => true,
            WhenExpr::Present(Ident::Input(key)) => {
                inputs.get(key).is_some_and(|v| !v.is_null())
            }
            WhenExpr::Eq(ident, literal) => resolve(ident, mode, inputs).as_deref() == Some(literal),
            WhenExpr::Ne(ident, literal) => resolve(ident, mode, inputs).as_deref() != Some(literal),
        }
    }
}

/// Parse and evaluate; `None` always holds
pub fn evaluate(when: Option<&str>, mode: Mode, inputs: &Map<String, Value>) -> Result<bool> {
    match when {
        None => Ok(true),
        Some(source) => Ok(WhenExpr::parse(source)?.evaluate(mode, inputs)),
    }
}

fn parse_ident(source: &str, ident: &str) -> Result<Ident> {
    if ident == "mode" {
        return Ok(Ident::Mode);
    }
    let Some(key) = ident.strip_prefix("inputs.") else {
        return Err(when_error(source, "identifier must be 'mode' or 'inputs.<key>'"));
    };
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(when_error(source, "invalid input key"));
    }
    Ok(Ident::Input(key.to_string()))
}

fn parse_literal(source: &str, literal: &str) -> Result<String> {
    for quote in ['"', '\''] {
        if let Some(inner) = literal
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            if inner.contains(quote) {
                return Err(when_error(source, "unbalanced quotes"));
            }
            return Ok(inner.to_string());
        }
    }

    if literal.is_empty()
        || !literal
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(when_error(source, "invalid literal"));
    }
    Ok(literal.to_string())
}

fn resolve(ident: &Ident, mode: Mode, inputs: &Map<String, Value>) -> Option<String> {
    match ident {
        Ident::Mode => Some(mode.to_string()),
        Ident::Input(key) => match inputs.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        },
    }
}
