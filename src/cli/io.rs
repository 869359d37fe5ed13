//! JSON output for CLI commands
//!
//! One JSON document per line on stdout, UTF-8 only.

use std::io::{self, Write};

use serde::Serialize;

use super::errors::CliResult;

/// Write a value as a single JSON line to stdout
pub fn write_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}
