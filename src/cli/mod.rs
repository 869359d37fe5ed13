//! CLI module for DentaVault
//!
//! Provides command-line access to:
//! - backup / list / delete / prune: registry maintenance
//! - restore: restore with JSON progress lines
//! - sync-assets: register orphan image files

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::run_command;
pub use errors::{CliError, CliResult};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    run_command(Cli::parse_args().command)
}
