//! Persistent backup catalog
//!
//! An ordered list of `BackupRecord`, newest first, capped at a fixed
//! capacity and stored as one pretty-printed JSON document. Writes go to
//! a sibling temp file and are renamed into place.
//!
//! Single-process assumption: read-modify-write is not locked across
//! processes. Within a process the engine's operation guard serializes
//! every mutation.

mod record;

pub use record::{format_size, BackupFormat, BackupListing, BackupRecord};

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::errors::{VaultError, VaultResult};
use crate::observability::{log_event_with_fields, Event};
use crate::reaper::ReliableDelete;

/// Catalog stored at a fixed path
pub struct BackupRegistry {
    path: PathBuf,
    capacity: usize,
}

impl BackupRegistry {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity: capacity.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the catalog as stored
    ///
    /// A missing document is an empty catalog. An unreadable one is moved
    /// aside to `<path>.corrupt-<millis>` and logged, then treated as empty,
    /// so a damaged catalog never blocks taking a new backup and the next
    /// write never overwrites it.
    pub fn load(&self) -> VaultResult<Vec<BackupRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VaultError::io_error_at_path(&self.path, e)),
        };

        match serde_json::from_str::<Vec<BackupRecord>>(&content) {
            Ok(records) => {
                log_event_with_fields(
                    Event::RegistryLoaded,
                    &[("entries", &records.len().to_string())],
                );
                Ok(records)
            }
            Err(e) => {
                let quarantined = self.quarantine()?;
                log_event_with_fields(
                    Event::RegistryCorrupt,
                    &[
                        ("path", &self.path.display().to_string()),
                        ("moved_to", &quarantined.display().to_string()),
                        ("error", &e.to_string()),
                    ],
                );
                Ok(Vec::new())
            }
        }
    }

    fn quarantine(&self) -> VaultResult<PathBuf> {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".corrupt-{}", Utc::now().timestamp_millis()));
        let target = PathBuf::from(name);

        fs::rename(&self.path, &target).map_err(|e| {
            VaultError::registry(format!(
                "Registry at {} is unreadable and could not be moved aside",
                self.path.display()
            ))
            .with_source(e)
        })?;
        Ok(target)
    }

    fn persist(&self, records: &[BackupRecord]) -> VaultResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| VaultError::io_error_at_path(parent, e))?;
            }
        }

        let json = serde_json::to_string_pretty(records)
            .map_err(|e| VaultError::registry(format!("Failed to serialize registry: {}", e)))?;

        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let write = || -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            VaultError::io_error_at_path(&self.path, e)
        })
    }

    /// Insert or replace by name, then cap to capacity
    pub fn add(&self, record: BackupRecord) -> VaultResult<()> {
        let mut records = self.load()?;

        match records.iter().position(|r| r.name == record.name) {
            Some(index) => records[index] = record,
            None => records.insert(0, record),
        }

        if records.len() > self.capacity {
            for evicted in records.drain(self.capacity..) {
                log_event_with_fields(Event::RegistryEntryEvicted, &[("name", &evicted.name)]);
            }
        }

        self.persist(&records)
    }

    /// Records whose file still exists, first occurrence per name
    ///
    /// Persists the healed catalog when anything was dropped.
    pub fn list(&self) -> VaultResult<Vec<BackupRecord>> {
        let records = self.load()?;
        let original_len = records.len();

        let mut seen = HashSet::new();
        let healed: Vec<BackupRecord> = records
            .into_iter()
            .filter(|r| r.path.exists())
            .filter(|r| seen.insert(r.name.clone()))
            .collect();

        if healed.len() != original_len {
            self.persist(&healed)?;
        }
        Ok(healed)
    }

    pub fn get(&self, name: &str) -> VaultResult<BackupRecord> {
        self.load()?
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| VaultError::backup_not_found(name))
    }

    /// Delete the backing file (tolerating its absence) and the entry
    pub fn remove(&self, name: &str, reaper: &dyn ReliableDelete) -> VaultResult<BackupRecord> {
        let mut records = self.load()?;
        let index = records
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| VaultError::backup_not_found(name))?;

        reaper.remove_tree(&records[index].path)?;

        let removed = records.remove(index);
        self.persist(&records)?;

        log_event_with_fields(
            Event::RegistryEntryRemoved,
            &[("name", name), ("path", &removed.path.display().to_string())],
        );
        Ok(removed)
    }
}
