// src/commands/receipts.rs
//! Receipt queries and signing key management

use super::{engine_context, print_json};
use anyhow::{Context, Result};
use gitvan_pack::config::EngineConfig;
use gitvan_pack::receipt::{
    ExportFormat, Operation, Receipt, ReceiptStatus, ReceiptStore, SigningKeyPair, PRIVATE_KEY_FILE,
};
use std::path::{Path, PathBuf};
use tracing::info;

pub struct ReceiptQuery {
    pub pack: Option<String>,
    pub latest: bool,
    pub status: Option<String>,
    pub operation: Option<String>,
    pub export: Option<String>,
}

pub fn cmd_receipts(config: EngineConfig, target: &Path, query: ReceiptQuery, json: bool) -> Result<()> {
    let ctx = engine_context(false);
    let store = ReceiptStore::new(&config, ctx.vcs.clone());

    if let Some(format) = query.export {
        let format: ExportFormat = format.parse()?;
        print!("{}", store.export(target, format)?);
        return Ok(());
    }

    let status: Option<ReceiptStatus> = query
        .status
        .map(|s| s.parse().with_context(|| format!("Unknown receipt status '{}'", s)))
        .transpose()?;
    let operation: Option<Operation> = query
        .operation
        .map(|s| s.parse().with_context(|| format!("Unknown operation '{}'", s)))
        .transpose()?;

    let mut receipts: Vec<Receipt> = store
        .read(target, query.pack.as_deref(), false)?
        .into_iter()
        .filter(|r| status.is_none_or(|s| r.status == s))
        .filter(|r| operation.is_none_or(|o| r.operation == o))
        .collect();
    if query.latest {
        receipts.truncate(1);
    }

    if json {
        return print_json(&receipts);
    }
    if receipts.is_empty() {
        println!("No receipts recorded");
        return Ok(());
    }
    for receipt in &receipts {
        let signed = if receipt.signature.is_some() { "signed" } else { "" };
        println!(
            "{} {:<24} {:<10} {:<8} {:<8} {} {}",
            receipt.timestamp,
            receipt.id,
            receipt.version,
            receipt.operation,
            receipt.status,
            receipt.commit,
            signed
        );
    }
    Ok(())
}

pub fn cmd_keygen(config: EngineConfig, key_dir: Option<PathBuf>, force: bool) -> Result<()> {
    let key_dir = key_dir.unwrap_or(config.key_dir);
    if key_dir.join(PRIVATE_KEY_FILE).exists() && !force {
        return Err(anyhow::anyhow!(
            "A signing key already exists in {} (use --force to replace it)",
            key_dir.display()
        ));
    }

    let pair = SigningKeyPair::generate();
    pair.save(&key_dir)
        .with_context(|| format!("Failed to write keys to {}", key_dir.display()))?;
    info!("Generated signing key in {}", key_dir.display());
    println!("Public key: {}", pair.public_key_base64());
    println!("Key directory: {}", key_dir.display());
    Ok(())
}
