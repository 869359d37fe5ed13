//! CLI command implementations
//!
//! Each command loads the configuration, opens the engine and prints its
//! result as JSON. Engine log lines go to the same streams; result lines
//! are the only ones without an `event` key.

use std::path::Path;

use serde_json::json;

use crate::config::EngineConfig;
use crate::engine::BackupEngine;
use crate::restore::ProgressUpdate;
use crate::schedule::BackupSchedule;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_json;

/// Run a parsed command
pub fn run_command(command: Command) -> CliResult<()> {
    let mut engine = open_engine(command.config_path())?;

    match command {
        Command::Backup {
            output,
            with_assets,
            ..
        } => {
            let record = engine.create_backup(output.as_deref(), with_assets)?;
            write_json(&record)
        }
        Command::List { .. } => write_json(&engine.list_backups()?),
        Command::Delete { name, .. } => {
            let removed = engine.delete_backup(&name)?;
            write_json(&json!({ "deleted": removed.name }))
        }
        Command::Restore { source, .. } => {
            let mut failed_output = None;
            let mut observer = |update: &ProgressUpdate| {
                if failed_output.is_none() {
                    failed_output = write_json(update).err();
                }
            };
            let outcome = engine.restore_backup(&source, &mut observer)?;
            if let Some(e) = failed_output {
                return Err(e);
            }
            write_json(&outcome)
        }
        Command::Prune { keep, .. } => {
            let removed = engine.prune_backups(keep)?;
            write_json(&json!({ "kept": keep, "deleted": removed }))
        }
        Command::SyncAssets { .. } => write_json(&engine.synchronize_assets()?),
        Command::Schedule {
            frequency,
            keep,
            with_assets,
            runs,
            ..
        } => {
            let schedule = BackupSchedule::new(frequency)?
                .with_keep(keep)
                .with_assets(with_assets);
            let succeeded = schedule.run(&engine, runs)?;
            write_json(&json!({ "frequency": frequency, "succeeded": succeeded }))
        }
    }
}

fn open_engine(config_path: &Path) -> CliResult<BackupEngine> {
    if !config_path.is_file() {
        return Err(CliError::Config(format!(
            "Config file not found: {}",
            config_path.display()
        )));
    }
    let config = EngineConfig::load(config_path)?;
    Ok(BackupEngine::open(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir) -> PathBuf {
        let db = temp.path().join("clinic.db");
        let conn = rusqlite::Connection::open(&db).unwrap();
        conn.execute_batch("CREATE TABLE patients (id INTEGER PRIMARY KEY);")
            .unwrap();
        drop(conn);

        let config = temp.path().join("dentavault.json");
        fs::write(&config, json!({ "db_path": db }).to_string()).unwrap();
        config
    }

    #[test]
    fn test_missing_config_is_config_error() {
        let temp = TempDir::new().unwrap();
        let err = run_command(Command::List {
            config: temp.path().join("absent.json"),
        })
        .unwrap_err();
        assert_eq!(err.code_str(), "DENTAVAULT_CLI_CONFIG_ERROR");
    }

    #[test]
    fn test_backup_then_delete() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);

        run_command(Command::Backup {
            config: config.clone(),
            output: Some(temp.path().join("manual.db")),
            with_assets: false,
        })
        .unwrap();
        assert!(temp.path().join("manual.db").is_file());

        run_command(Command::Delete {
            config: config.clone(),
            name: "manual".to_string(),
        })
        .unwrap();
        assert!(!temp.path().join("manual.db").exists());

        let err = run_command(Command::Delete {
            config,
            name: "manual".to_string(),
        })
        .unwrap_err();
        assert_eq!(err.code_str(), "VAULT_BACKUP_NOT_FOUND");
    }

    #[test]
    fn test_schedule_with_zero_runs_returns_immediately() {
        let temp = TempDir::new().unwrap();
        let config = write_config(&temp);

        run_command(Command::Schedule {
            config,
            frequency: crate::schedule::BackupFrequency::Hourly,
            keep: 3,
            with_assets: false,
            runs: Some(0),
        })
        .unwrap();
        assert!(!temp.path().join("backups").exists());
    }
}
