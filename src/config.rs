//! Engine configuration
//!
//! Loaded from a JSON file. Only `db_path` is required; every other
//! location defaults relative to the database's directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{VaultError, VaultResult};
use crate::observability::{log_event_with_fields, Event};

/// Engine configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Live database file (required)
    pub db_path: PathBuf,

    /// Asset tree root (default: `<db dir>/dental_images`)
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,

    /// Default destination for new backups (default: `<db dir>/backups`)
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    /// Registry document (default: `<db dir>/backup_registry.json`)
    #[serde(default)]
    pub registry_path: Option<PathBuf>,

    /// Scratch space for rollback snapshots and extraction (default: db dir)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Maximum registry entries (default: 50)
    #[serde(default = "default_registry_capacity")]
    pub registry_capacity: usize,

    /// Pre-restore asset tree copies to keep (default: 2)
    #[serde(default = "default_asset_backup_retention")]
    pub asset_backup_retention: usize,

    /// Version stamped into each backup record (default: crate version)
    #[serde(default = "default_app_version")]
    pub app_version: String,
}

fn default_registry_capacity() -> usize {
    50
}

fn default_asset_backup_retention() -> usize {
    2
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl EngineConfig {
    /// Defaults for a database at `db_path`
    pub fn for_database(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            assets_dir: None,
            backup_dir: None,
            registry_path: None,
            work_dir: None,
            registry_capacity: default_registry_capacity(),
            asset_backup_retention: default_asset_backup_retention(),
            app_version: default_app_version(),
        }
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> VaultResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| VaultError::config(format!("Failed to read config: {}", e)))?;

        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| VaultError::config(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("config", &path.display().to_string()),
                ("db_path", &config.db_path.display().to_string()),
            ],
        );

        Ok(config)
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(VaultError::config("db_path must not be empty"));
        }
        if self.registry_capacity == 0 {
            return Err(VaultError::config("registry_capacity must be > 0"));
        }
        Ok(())
    }

    fn db_dir(&self) -> PathBuf {
        match self.db_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.assets_dir
            .clone()
            .unwrap_or_else(|| self.db_dir().join("dental_images"))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.db_dir().join("backups"))
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| self.db_dir().join("backup_registry.json"))
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| self.db_dir())
    }
}
