//! CLI-specific error types

use std::io;

use thiserror::Error;

use crate::errors::VaultError;

/// CLI error
#[derive(Debug, Error)]
pub enum CliError {
    #[error("DENTAVAULT_CLI_CONFIG_ERROR: {0}")]
    Config(String),

    #[error("DENTAVAULT_CLI_IO_ERROR: {0}")]
    Io(#[from] io::Error),

    #[error("DENTAVAULT_CLI_OUTPUT_ERROR: {0}")]
    Output(#[from] serde_json::Error),

    /// Failure reported by the engine
    #[error("{0}")]
    Engine(#[from] VaultError),
}

impl CliError {
    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        match self {
            CliError::Config(_) => "DENTAVAULT_CLI_CONFIG_ERROR",
            CliError::Io(_) => "DENTAVAULT_CLI_IO_ERROR",
            CliError::Output(_) => "DENTAVAULT_CLI_OUTPUT_ERROR",
            CliError::Engine(e) => e.code().as_str(),
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
