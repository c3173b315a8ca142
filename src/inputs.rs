// src/inputs.rs

//! Pack input resolution
//!
//! Three passes over the declared inputs:
//!
//! 1. caller-supplied values are coerced to their declared type and validated
//! 2. unset inputs go to the [`Prompt`] capability (pre-baked answer, default
//!    or nothing)
//! 3. the complete map is validated again
//!
//! The result holds every declared input, `null` for optional inputs nobody
//! supplied.

use crate::capability::{Prompt, PromptAnswer};
use crate::error::{Error, InputErrorKind, Result};
use crate::manifest::{InputSchema, InputType};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Resolved `key -> value` map in declaration order
pub type Resolved = Map<String, Value>;

pub struct InputResolver<'a> {
    schemas: &'a [InputSchema],
    base_dir: PathBuf,
}

impl<'a> InputResolver<'a> {
    /// Relative `path` inputs resolve against the current directory
    pub fn new(schemas: &'a [InputSchema]) -> Self {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self { schemas, base_dir }
    }

    /// Relative `path` inputs resolve against `base_dir`
    pub fn with_base_dir(schemas: &'a [InputSchema], base_dir: &Path) -> Self {
        Self {
            schemas,
            base_dir: base_dir.to_path_buf(),
        }
    }

    pub fn resolve(&self, provided: &Map<String, Value>, prompt: &dyn Prompt) -> Result<Resolved> {
        let mut resolved = Resolved::new();

        // Pass 1: caller values
        for schema in self.schemas {
            if let Some(value) = provided.get(&schema.key).filter(|v| !v.is_null()) {
                let value = self.coerce(schema, value)?;
                validate(schema, &value)?;
                resolved.insert(schema.key.clone(), value);
            }
        }

        for key in provided.keys() {
            if !self.schemas.iter().any(|s| &s.key == key) {
                debug!("Ignoring undeclared input '{}'", key);
            }
        }

        // Pass 2: prompt for the rest
        for schema in self.schemas {
            if resolved.contains_key(&schema.key) {
                continue;
            }
            let value = match prompt.ask(schema)? {
                PromptAnswer::Value(value) if !value.is_null() => self.coerce(schema, &value)?,
                PromptAnswer::Value(_) | PromptAnswer::UseDefault | PromptAnswer::Unanswered => {
                    match &schema.default {
                        Some(default) => self.coerce(schema, default)?,
                        None if schema.is_required() => {
                            return Err(Error::input(
                                InputErrorKind::MissingRequired,
                                &schema.key,
                                "required input has no value and no default",
                            ));
                        }
                        None => Value::Null,
                    }
                }
            };
            resolved.insert(schema.key.clone(), value);
        }

        // Pass 3: everything together
        for schema in self.schemas {
            let value = resolved.get(&schema.key).unwrap_or(&Value::Null);
            validate(schema, value)?;
        }

        Ok(resolved)
    }

    fn coerce(&self, schema: &InputSchema, value: &Value) -> Result<Value> {
        let fail = |expected: &str| {
            Error::input(
                InputErrorKind::Coerce,
                &schema.key,
                format!("cannot convert {} to {}", value, expected),
            )
        };

        match schema.input_type {
            InputType::String | InputType::Text | InputType::Select => {
                scalar_text(value).map(Value::String).ok_or_else(|| fail("string"))
            }
            InputType::Number => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => parse_number(s.trim()).ok_or_else(|| fail("number")),
                _ => Err(fail("number")),
            },
            InputType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
                Value::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => Ok(Value::Bool(true)),
                    "false" | "no" | "0" => Ok(Value::Bool(false)),
                    _ => Err(fail("boolean")),
                },
                _ => Err(fail("boolean")),
            },
            InputType::Path => {
                let Value::String(s) = value else {
                    return Err(fail("path"));
                };
                if s.trim().is_empty() {
                    return Err(fail("path"));
                }
                let joined = self.base_dir.join(s.trim());
                Ok(Value::String(normalize(&joined).to_string_lossy().into_owned()))
            }
            InputType::Multiselect => match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| scalar_text(item).map(Value::String))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Array)
                    .ok_or_else(|| fail("list")),
                Value::String(s) => Ok(Value::Array(
                    s.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(|p| Value::String(p.to_string()))
                        .collect(),
                )),
                _ => Err(fail("list")),
            },
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    let f = s.parse::<f64>().ok()?;
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        return Some(Value::Number((f as i64).into()));
    }
    Number::from_f64(f).map(Value::Number)
}

/// Lexical normalization; the path need not exist
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn validate(schema: &InputSchema, value: &Value) -> Result<()> {
    let key = &schema.key;
    let invalid = |message: String| Error::input(InputErrorKind::Validate, key, message);

    let missing = match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    };
    if missing {
        if schema.is_required() {
            return Err(Error::input(
                InputErrorKind::MissingRequired,
                key,
                "required input is empty",
            ));
        }
        return Ok(());
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.min
            && n < min
        {
            return Err(invalid(format!("{} is below the minimum {}", n, min)));
        }
        if let Some(max) = schema.max
            && n > max
        {
            return Err(invalid(format!("{} is above the maximum {}", n, max)));
        }
    }

    let length = match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    };
    if let Some(len) = length {
        if let Some(min) = schema.min_length
            && len < min
        {
            return Err(invalid(format!("length {} is below the minimum {}", len, min)));
        }
        if let Some(max) = schema.max_length
            && len > max
        {
            return Err(invalid(format!("length {} is above the maximum {}", len, max)));
        }
    }

    if let (Some(pattern), Value::String(s)) = (&schema.pattern, value) {
        let re = Regex::new(pattern).map_err(|e| invalid(format!("bad pattern: {}", e)))?;
        if !re.is_match(s) {
            return Err(invalid(format!("'{}' does not match {}", s, pattern)));
        }
    }

    if let Some(allowed) = &schema.enum_values {
        let members: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for member in members {
            if !allowed.iter().any(|a| enum_eq(a, member)) {
                return Err(invalid(format!("{} is not one of the allowed values", member)));
            }
        }
    }

    Ok(())
}

fn enum_eq(allowed: &Value, value: &Value) -> bool {
    allowed == value || scalar_text(allowed).is_some_and(|a| scalar_text(value) == Some(a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::NonInteractive;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schema(key: &str, input_type: InputType) -> InputSchema {
        InputSchema {
            key: key.to_string(),
            input_type,
            ..InputSchema::default()
        }
    }

    fn provided(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    /// Counts how often it is consulted
    #[derive(Default)]
    struct CountingPrompt {
        calls: AtomicUsize,
    }

    impl Prompt for CountingPrompt {
        fn ask(&self, _input: &InputSchema) -> Result<PromptAnswer> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PromptAnswer::UseDefault)
        }
    }

    #[test]
    fn test_coercions() {
        let schemas = vec![
            schema("flag", InputType::Boolean),
            schema("port", InputType::Number),
            schema("ratio", InputType::Number),
            schema("features", InputType::Multiselect),
            schema("out", InputType::Path),
        ];
        let resolver = InputResolver::with_base_dir(&schemas, Path::new("/work/app"));
        let resolved = resolver
            .resolve(
                &provided(json!({
                    "flag": "YES",
                    "port": "8080",
                    "ratio": "0.5",
                    "features": "auth, db,,",
                    "out": "./build/../dist"
                })),
                &NonInteractive::default(),
            )
            .unwrap();

        assert_eq!(resolved["flag"], json!(true));
        assert_eq!(resolved["port"], json!(8080));
        assert_eq!(resolved["ratio"], json!(0.5));
        assert_eq!(resolved["features"], json!(["auth", "db"]));
        assert_eq!(resolved["out"], json!("/work/app/dist"));
    }

    #[test]
    fn test_bad_boolean_is_coerce_error() {
        let schemas = vec![schema("flag", InputType::Boolean)];
        let err = InputResolver::new(&schemas)
            .resolve(&provided(json!({"flag": "maybe"})), &NonInteractive::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Input { kind: InputErrorKind::Coerce, ref key, .. } if key == "flag"
        ));
    }

    #[test]
    fn test_missing_required() {
        let mut name = schema("name", InputType::String);
        name.required = true;
        let schemas = vec![name];

        let err = InputResolver::new(&schemas)
            .resolve(&Map::new(), &NonInteractive::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Input { kind: InputErrorKind::MissingRequired, ref key, .. } if key == "name"
        ));
        assert_eq!(err.exit_code(), 4);

        let resolved = InputResolver::new(&schemas)
            .resolve(
                &Map::new(),
                &NonInteractive::default().answer("name", json!("demo")),
            )
            .unwrap();
        assert_eq!(resolved["name"], json!("demo"));
    }

    #[test]
    fn test_defaults_and_optional_nulls() {
        let mut port = schema("port", InputType::Number);
        port.default = Some(json!("3000"));
        port.required = true;
        let schemas = vec![port, schema("optional", InputType::String)];

        let resolved = InputResolver::new(&schemas)
            .resolve(&Map::new(), &NonInteractive::default())
            .unwrap();
        assert_eq!(resolved["port"], json!(3000));
        assert_eq!(resolved["optional"], Value::Null);
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn test_validation_rules() {
        let mut port = schema("port", InputType::Number);
        port.min = Some(1024.0);
        port.max = Some(65535.0);
        let mut name = schema("name", InputType::String);
        name.pattern = Some("^[a-z-]+$".to_string());
        name.max_length = Some(10);
        let mut framework = schema("framework", InputType::Select);
        framework.enum_values = Some(vec![json!("react"), json!("vue")]);
        let schemas = vec![port, name, framework];
        let resolver = InputResolver::new(&schemas);
        let prompt = NonInteractive::default();

        for bad in [
            json!({"port": 80}),
            json!({"name": "Bad Name"}),
            json!({"name": "much-too-long-name"}),
            json!({"framework": "svelte"}),
        ] {
            let err = resolver.resolve(&provided(bad.clone()), &prompt).unwrap_err();
            assert!(
                matches!(err, Error::Input { kind: InputErrorKind::Validate, .. }),
                "{bad}"
            );
        }

        let ok = resolver
            .resolve(
                &provided(json!({"port": 3000, "name": "my-app", "framework": "vue"})),
                &prompt,
            )
            .unwrap();
        assert_eq!(ok["framework"], json!("vue"));
    }

    #[test]
    fn test_prompt_only_for_unresolved() {
        let mut a = schema("a", InputType::String);
        a.default = Some(json!("x"));
        let mut b = schema("b", InputType::String);
        b.default = Some(json!("y"));
        let schemas = vec![a, b];

        let prompt = CountingPrompt::default();
        InputResolver::new(&schemas)
            .resolve(&provided(json!({"a": "given"})), &prompt)
            .unwrap();
        assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);
    }
}
