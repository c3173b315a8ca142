// src/commands/mod.rs
//! Command implementations for the gitvan-pack CLI

mod pack;
mod receipts;

pub use pack::{cmd_apply, cmd_plan, cmd_remove, cmd_status, cmd_update, cmd_verify};
pub use receipts::{cmd_keygen, cmd_receipts, ReceiptQuery};

use anyhow::{Context, Result};
use gitvan_pack::capability::{EngineContext, ProcessExec};
use gitvan_pack::config::EngineConfig;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Configuration from `--config` (or defaults) with the environment overlaid
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    Ok(config.with_env())
}

/// Context backed by `git` and real processes
pub fn engine_context(approved: bool) -> EngineContext {
    EngineContext::new()
        .exec(Arc::new(ProcessExec))
        .approved(approved)
}

/// Parse `KEY=VALUE` arguments; values that parse as JSON keep their type
pub fn parse_inputs(raw: &[String]) -> Result<Map<String, Value>> {
    let mut inputs = Map::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid input '{}': expected KEY=VALUE", entry))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow::anyhow!("Invalid input '{}': empty key", entry));
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        inputs.insert(key.to_string(), value);
    }
    Ok(inputs)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
