//! CLI argument definitions using clap
//!
//! Commands:
//! - dentavault backup --config <path> [--output <path>] [--with-assets]
//! - dentavault list --config <path>
//! - dentavault delete --config <path> <name>
//! - dentavault restore --config <path> <source>
//! - dentavault prune --config <path> [--keep <n>]
//! - dentavault sync-assets --config <path>
//! - dentavault schedule --config <path> --frequency <hourly|daily|weekly> [--keep <n>] [--with-assets] [--runs <n>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::DEFAULT_PRUNE_KEEP;
use crate::schedule::BackupFrequency;

/// DentaVault - backup and restore for the clinic database and its images
#[derive(Parser, Debug)]
#[command(name = "dentavault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a verified backup and register it
    Backup {
        /// Path to configuration file
        #[arg(long, default_value = "./dentavault.json")]
        config: PathBuf,

        /// Destination file; the extension is replaced by .db or .zip
        #[arg(long)]
        output: Option<PathBuf>,

        /// Bundle the treatment image tree with the database
        #[arg(long)]
        with_assets: bool,
    },

    /// List registered backups
    List {
        /// Path to configuration file
        #[arg(long, default_value = "./dentavault.json")]
        config: PathBuf,
    },

    /// Delete a registered backup by name
    Delete {
        /// Path to configuration file
        #[arg(long, default_value = "./dentavault.json")]
        config: PathBuf,

        name: String,
    },

    /// Restore a backup over the live database
    Restore {
        /// Path to configuration file
        #[arg(long, default_value = "./dentavault.json")]
        config: PathBuf,

        /// Backup file (.db, .zip or legacy .json); the extension may be omitted
        source: PathBuf,
    },

    /// Delete all but the newest backups
    Prune {
        /// Path to configuration file
        #[arg(long, default_value = "./dentavault.json")]
        config: PathBuf,

        #[arg(long, default_value_t = DEFAULT_PRUNE_KEEP)]
        keep: usize,
    },

    /// Register image files that have no database row
    SyncAssets {
        /// Path to configuration file
        #[arg(long, default_value = "./dentavault.json")]
        config: PathBuf,
    },

    /// Back up and prune on a recurring schedule
    Schedule {
        /// Path to configuration file
        #[arg(long, default_value = "./dentavault.json")]
        config: PathBuf,

        /// hourly, daily or weekly
        #[arg(long)]
        frequency: BackupFrequency,

        /// Backups kept after each pass
        #[arg(long, default_value_t = DEFAULT_PRUNE_KEEP)]
        keep: usize,

        #[arg(long)]
        with_assets: bool,

        /// Stop after this many passes
        #[arg(long)]
        runs: Option<usize>,
    },
}

impl Command {
    pub fn config_path(&self) -> &PathBuf {
        match self {
            Command::Backup { config, .. }
            | Command::List { config }
            | Command::Delete { config, .. }
            | Command::Restore { config, .. }
            | Command::Prune { config, .. }
            | Command::SyncAssets { config }
            | Command::Schedule { config, .. } => config,
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
