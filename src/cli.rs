// src/cli.rs
//! CLI definitions for gitvan-pack
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gitvan-pack")]
#[command(version)]
#[command(about = "Apply, update and remove packs with verifiable receipts", long_about = None)]
pub struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Target working tree
    #[arg(short, long, global = true, default_value = ".")]
    pub target: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show what applying a pack would do, without changing anything
    Plan {
        /// Pack directory or its pack.json
        pack: PathBuf,

        /// Input value (repeatable)
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Mark the operation as explicitly approved
        #[arg(long)]
        approve: bool,
    },

    /// Apply a pack to the target
    Apply {
        /// Pack directory or its pack.json
        pack: PathBuf,

        /// Input value (repeatable)
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Mark the operation as explicitly approved
        #[arg(long)]
        approve: bool,

        /// Sign the receipt with the local key
        #[arg(long)]
        sign: bool,
    },

    /// Update an installed pack to a new version
    Update {
        /// Pack directory or its pack.json
        pack: PathBuf,

        /// Input value (repeatable)
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Apply despite high-severity risks
        #[arg(long)]
        force: bool,

        /// Mark the operation as explicitly approved
        #[arg(long)]
        approve: bool,

        /// Sign the receipt with the local key
        #[arg(long)]
        sign: bool,
    },

    /// Remove an installed pack
    Remove {
        /// Pack id
        pack_id: String,

        /// Delete files even when they were modified since install
        #[arg(long)]
        force: bool,

        /// Mark the operation as explicitly approved
        #[arg(long)]
        approve: bool,
    },

    /// List installed packs
    Status,

    /// Verify an installed pack's receipt and files
    Verify {
        /// Pack id
        pack_id: String,

        /// Only accept signatures from this public key file
        #[arg(long)]
        public_key: Option<PathBuf>,
    },

    /// Query recorded receipts
    Receipts {
        /// Only receipts for this pack
        #[arg(long)]
        pack: Option<String>,

        /// Only the newest matching receipt
        #[arg(long)]
        latest: bool,

        /// Filter by status (success, partial, failure)
        #[arg(long)]
        status: Option<String>,

        /// Filter by operation (install, update, remove, verify)
        #[arg(long)]
        operation: Option<String>,

        /// Export every receipt as json or csv
        #[arg(long, value_name = "FORMAT")]
        export: Option<String>,
    },

    /// Generate a receipt signing key pair
    Keygen {
        /// Key directory (default from configuration)
        #[arg(long)]
        key_dir: Option<PathBuf>,

        /// Replace an existing key pair
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from([
            "gitvan-pack",
            "--target",
            "/work",
            "apply",
            "./packs/demo",
            "-i",
            "name=demo",
            "--input",
            "port=8080",
            "--sign",
        ])
        .unwrap();
        assert_eq!(cli.target, PathBuf::from("/work"));
        match cli.command {
            Commands::Apply {
                pack, inputs, sign, ..
            } => {
                assert_eq!(pack, PathBuf::from("./packs/demo"));
                assert_eq!(inputs, vec!["name=demo", "port=8080"]);
                assert!(sign);
            }
            _ => panic!("expected apply"),
        }
    }
}
