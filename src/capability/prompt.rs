// src/capability/prompt.rs

//! Prompt capability consulted for inputs the caller left unset

use crate::error::Result;
use crate::manifest::InputSchema;
use serde_json::Value;
use std::collections::BTreeMap;

/// Outcome of asking for one input
#[derive(Debug, Clone, PartialEq)]
pub enum PromptAnswer {
    /// An explicit value, coerced and validated like caller input
    Value(Value),
    /// Use the schema default
    UseDefault,
    /// No answer available
    Unanswered,
}

pub trait Prompt: Send + Sync {
    fn ask(&self, input: &InputSchema) -> Result<PromptAnswer>;
}

/// Answers from a pre-baked table; falls back to defaults, never blocks
#[derive(Debug, Default, Clone)]
pub struct NonInteractive {
    answers: BTreeMap<String, Value>,
}

impl NonInteractive {
    pub fn new(answers: BTreeMap<String, Value>) -> Self {
        Self { answers }
    }

    pub fn answer(mut self, key: &str, value: Value) -> Self {
        self.answers.insert(key.to_string(), value);
        self
    }
}

impl Prompt for NonInteractive {
    fn ask(&self, input: &InputSchema) -> Result<PromptAnswer> {
        if let Some(value) = self.answers.get(&input.key) {
            return Ok(PromptAnswer::Value(value.clone()));
        }
        if input.default.is_some() {
            return Ok(PromptAnswer::UseDefault);
        }
        Ok(PromptAnswer::Unanswered)
    }
}
