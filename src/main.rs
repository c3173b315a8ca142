// src/main.rs

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use commands::ReceiptQuery;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = commands::load_config(cli.config.as_deref())?;
    let target = cli.target.as_path();
    let json = cli.json;

    match cli.command {
        Commands::Plan {
            pack,
            inputs,
            approve,
        } => commands::cmd_plan(config, &pack, target, &inputs, approve, json),
        Commands::Apply {
            pack,
            inputs,
            approve,
            sign,
        } => commands::cmd_apply(config, &pack, target, &inputs, approve, sign, json),
        Commands::Update {
            pack,
            inputs,
            force,
            approve,
            sign,
        } => commands::cmd_update(config, &pack, target, &inputs, force, approve, sign, json),
        Commands::Remove {
            pack_id,
            force,
            approve,
        } => commands::cmd_remove(config, &pack_id, target, force, approve, json),
        Commands::Status => commands::cmd_status(config, target, json),
        Commands::Verify {
            pack_id,
            public_key,
        } => commands::cmd_verify(config, &pack_id, target, public_key.as_deref(), json),
        Commands::Receipts {
            pack,
            latest,
            status,
            operation,
            export,
        } => {
            let query = ReceiptQuery {
                pack,
                latest,
                status,
                operation,
                export,
            };
            commands::cmd_receipts(config, target, query, json)
        }
        Commands::Keygen { key_dir, force } => commands::cmd_keygen(config, key_dir, force),
    }
}

/// Exit code of the engine error behind `err`, `1` for anything else
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<gitvan_pack::Error>())
        .map(|e| e.exit_code())
        .unwrap_or(1)
        .clamp(1, 255) as u8
}
