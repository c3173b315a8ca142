// src/commands/pack.rs
//! Pack lifecycle commands

use super::{engine_context, parse_inputs, print_json};
use anyhow::{Context, Result};
use gitvan_pack::config::EngineConfig;
use gitvan_pack::manager::{ApplyReport, PackManager, RemoveStatus, UpdateOutcome};
use gitvan_pack::receipt::load_public_key;
use gitvan_pack::Error;
use std::path::Path;
use tracing::info;

pub fn cmd_plan(
    config: EngineConfig,
    pack: &Path,
    target: &Path,
    inputs: &[String],
    approve: bool,
    json: bool,
) -> Result<()> {
    let inputs = parse_inputs(inputs)?;
    let manager = PackManager::new(config);
    let ctx = engine_context(approve);
    let report = manager.plan(pack, target, &inputs, &ctx)?;

    if json {
        return print_json(&report);
    }

    let plan = &report.plan;
    println!(
        "{}@{} -> {} ({})",
        plan.pack_id,
        plan.pack_version,
        target.display(),
        plan.mode
    );
    if plan.up_to_date {
        println!("Already installed and up to date.");
        return Ok(());
    }
    println!("Status: {}", plan.status);
    for step in &plan.steps {
        println!("  {}", step.label());
    }
    for path in &plan.skipped {
        println!("  skip {}", path.display());
    }
    for conflict in &plan.conflicts {
        println!("  conflict {} at {}: {}", conflict.reason, conflict.step, conflict.message);
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    if !report.decision.allowed {
        println!("Policy would deny this operation:");
        for violation in &report.decision.violations {
            println!("  - {}", violation);
        }
    }
    Ok(())
}

pub fn cmd_apply(
    mut config: EngineConfig,
    pack: &Path,
    target: &Path,
    inputs: &[String],
    approve: bool,
    sign: bool,
    json: bool,
) -> Result<()> {
    config.sign_receipts |= sign;
    let inputs = parse_inputs(inputs)?;
    let manager = PackManager::new(config);
    let ctx = engine_context(approve);

    info!("Applying {} to {}", pack.display(), target.display());
    let report = manager.apply(pack, target, &inputs, &ctx)?;
    if json {
        return print_json(&report);
    }
    print_apply(&report);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_update(
    mut config: EngineConfig,
    pack: &Path,
    target: &Path,
    inputs: &[String],
    force: bool,
    approve: bool,
    sign: bool,
    json: bool,
) -> Result<()> {
    config.sign_receipts |= sign;
    let inputs = parse_inputs(inputs)?;
    let manager = PackManager::new(config);
    let ctx = engine_context(approve);

    let outcome = manager.update(pack, target, &inputs, force, &ctx)?;
    if json {
        print_json(&outcome)?;
    }

    match &outcome {
        UpdateOutcome::Current { receipt } => {
            if !json {
                println!("{} is current.", receipt.label());
            }
            Ok(())
        }
        UpdateOutcome::Risks { risks, plan } => {
            if !json {
                println!("Update to {}@{} refused:", plan.pack_id, plan.pack_version);
                for risk in risks {
                    println!("  [{}] {}: {}", risk.severity, risk.kind, risk.message);
                }
                println!("Re-run with --force to apply anyway.");
            }
            Err(Error::Conflict {
                kind: "update-risks".to_string(),
                step: plan.pack_id.clone(),
            }
            .into())
        }
        UpdateOutcome::Applied { risks, report } => {
            if !json {
                for risk in risks {
                    println!("  [{}] {}: {}", risk.severity, risk.kind, risk.message);
                }
                print_apply(report);
            }
            Ok(())
        }
    }
}

pub fn cmd_remove(
    config: EngineConfig,
    pack_id: &str,
    target: &Path,
    force: bool,
    approve: bool,
    json: bool,
) -> Result<()> {
    let manager = PackManager::new(config);
    let ctx = engine_context(approve);
    let report = manager.remove(pack_id, target, force, &ctx)?;

    if json {
        print_json(&report)?;
    } else {
        println!("{}: {}", pack_id, report.status);
        for path in &report.removed {
            println!("  removed {}", path);
        }
        for issue in &report.skipped {
            println!("  kept {} ({})", issue.artifact, issue.reason);
        }
        for issue in &report.errors {
            println!("  error {} ({})", issue.artifact, issue.reason);
        }
    }

    match report.status {
        RemoveStatus::Ok => Ok(()),
        RemoveStatus::NotFound => Err(Error::NotInstalled(pack_id.to_string()).into()),
        RemoveStatus::Partial => Err(Error::Conflict {
            kind: "modified".to_string(),
            step: pack_id.to_string(),
        }
        .into()),
        RemoveStatus::Error => Err(anyhow::anyhow!("Removal of '{}' failed", pack_id)),
    }
}

pub fn cmd_status(config: EngineConfig, target: &Path, json: bool) -> Result<()> {
    let manager = PackManager::new(config);
    let ctx = engine_context(false);
    let installed = manager.status(target, &ctx)?;

    if json {
        return print_json(&installed);
    }
    if installed.is_empty() {
        println!("No packs installed in {}", target.display());
        return Ok(());
    }
    for receipt in &installed {
        println!(
            "{:<24} {:<10} {:<8} {:<8} {}",
            receipt.id, receipt.version, receipt.operation, receipt.status, receipt.timestamp
        );
    }
    Ok(())
}

pub fn cmd_verify(
    config: EngineConfig,
    pack_id: &str,
    target: &Path,
    public_key: Option<&Path>,
    json: bool,
) -> Result<()> {
    let trusted = public_key
        .map(|path| {
            load_public_key(path)
                .with_context(|| format!("Failed to load public key from {}", path.display()))
        })
        .transpose()?;
    let manager = PackManager::new(config);
    let ctx = engine_context(false);
    let outcome = manager.verify(pack_id, target, trusted.as_ref(), &ctx)?;

    if json {
        print_json(&outcome)?;
    } else {
        println!(
            "{}@{}: {} files checked",
            outcome.pack_id, outcome.version, outcome.checked
        );
        for error in &outcome.receipt.errors {
            println!("  receipt: {}", error);
        }
        for path in &outcome.modified {
            println!("  modified {}", path);
        }
        for path in &outcome.missing {
            println!("  missing {}", path);
        }
    }

    if outcome.is_clean() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Verification of '{}' failed", pack_id))
    }
}

fn print_apply(report: &ApplyReport) {
    let result = &report.result;
    println!("Status: {} ({})", result.status, result.mode);
    for label in &result.applied {
        println!("  done  {}", label);
    }
    for error in &result.errors {
        println!("  error {}: {}", error.step, error.cause);
    }
    for path in &result.skipped {
        println!("  skip  {}", path.display());
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    if let Some(receipt) = &report.receipt {
        let signed = if receipt.signature.is_some() { ", signed" } else { "" };
        println!("Receipt: {} {}{}", receipt.label(), receipt.status, signed);
    }
}
