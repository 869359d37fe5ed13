//! Backup catalog entries
//!
//! Serialized with snake_case field names. `backup_format` is one of
//! `sqlite_only`, `sqlite_with_images` or `legacy_json`; any other value
//! (older catalogs wrote `hybrid`) reads back as `unknown`.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Kind of file a record points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackupFormat {
    /// Raw SQLite file
    SqliteOnly,
    /// Zip bundle with the database and the asset tree
    SqliteWithImages,
    /// Row-by-row JSON export
    LegacyJson,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One registered backup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRecord {
    pub name: String,
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// RFC3339, millisecond precision
    pub created_at: String,
    /// Version of the tool that produced the backup
    pub version: String,
    pub platform: String,
    #[serde(default = "default_database_type")]
    pub database_type: String,
    #[serde(default)]
    pub backup_format: BackupFormat,
    #[serde(default)]
    pub includes_images: bool,
}

fn default_database_type() -> String {
    "sqlite".to_string()
}

impl BackupRecord {
    /// Record for a file just written, stamped now
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        size: u64,
        version: impl Into<String>,
        backup_format: BackupFormat,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            version: version.into(),
            platform: std::env::consts::OS.to_string(),
            database_type: default_database_type(),
            includes_images: backup_format == BackupFormat::SqliteWithImages,
            backup_format,
        }
    }

    /// Parsed creation time; unparseable timestamps sort oldest
    pub fn created_at_utc(&self) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// A record decorated for display
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackupListing {
    #[serde(flatten)]
    pub record: BackupRecord,
    pub formatted_size: String,
    pub is_db_only: bool,
    pub is_legacy: bool,
    pub includes_assets: bool,
    pub is_bundle: bool,
}

impl From<BackupRecord> for BackupListing {
    fn from(record: BackupRecord) -> Self {
        let format = record.backup_format;
        Self {
            formatted_size: format_size(record.size),
            is_db_only: format == BackupFormat::SqliteOnly,
            is_legacy: matches!(format, BackupFormat::LegacyJson | BackupFormat::Unknown),
            includes_assets: record.includes_images || format == BackupFormat::SqliteWithImages,
            is_bundle: format == BackupFormat::SqliteWithImages,
            record,
        }
    }
}

/// Human-readable size with up to two decimals
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}
