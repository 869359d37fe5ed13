//! Public engine surface
//!
//! `BackupEngine` owns the live database handle, the registry and the
//! operation guard. Every operation that touches the database, registry
//! or asset tree holds a guard ticket for its whole duration.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::archive::ArchiveBuilder;
use crate::assets::{synchronize_assets, SyncSummary};
use crate::config::EngineConfig;
use crate::database::{LiveDatabase, SqliteDatabase};
use crate::errors::{VaultError, VaultResult};
use crate::guard::{OperationGuard, OperationState};
use crate::observability::ObservationScope;
use crate::reaper::DirectoryReaper;
use crate::registry::{BackupFormat, BackupListing, BackupRecord, BackupRegistry};
use crate::restore::{ProgressObserver, RestoreOrchestrator, RestoreOutcome};
use crate::schedule::{BackupSchedule, ScheduledRun};
use crate::snapshot::BackupCreator;

/// Default number of backups kept by `prune_backups`
pub const DEFAULT_PRUNE_KEEP: usize = 10;

/// Backup and restore engine for one clinic database
pub struct BackupEngine {
    config: EngineConfig,
    db: Box<dyn LiveDatabase>,
    registry: BackupRegistry,
    creator: BackupCreator,
    reaper: DirectoryReaper,
    guard: OperationGuard,
}

impl BackupEngine {
    /// Open the live database named by `config`
    pub fn open(config: EngineConfig) -> VaultResult<Self> {
        config.validate()?;
        let db = SqliteDatabase::open(&config.db_path)?;
        Self::with_database(config, Box::new(db))
    }

    /// Build an engine around an already open database
    pub fn with_database(config: EngineConfig, db: Box<dyn LiveDatabase>) -> VaultResult<Self> {
        config.validate()?;
        let registry = BackupRegistry::new(config.registry_path(), config.registry_capacity);
        let guard = OperationGuard::for_database(db.path());
        Ok(Self {
            config,
            db,
            registry,
            creator: BackupCreator::new(),
            reaper: DirectoryReaper::new(),
            guard,
        })
    }

    /// Replace the capture strategy chain
    pub fn with_creator(mut self, creator: BackupCreator) -> Self {
        self.creator = creator;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> &dyn LiveDatabase {
        &*self.db
    }

    /// A handle observing this engine's operation state
    pub fn guard(&self) -> OperationGuard {
        self.guard.clone()
    }

    pub fn state(&self) -> OperationState {
        self.guard.state()
    }

    /// Capture a verified backup and register it
    ///
    /// `destination` is a file path hint; its extension is replaced by
    /// `.db`, or `.zip` when `include_assets` is set. Without a hint the
    /// backup lands in the configured backup directory under a
    /// timestamped name.
    pub fn create_backup(
        &self,
        destination: Option<&Path>,
        include_assets: bool,
    ) -> VaultResult<BackupRecord> {
        let _ticket = self.guard.try_begin(OperationState::BackingUp)?;
        self.capture_and_register(destination, include_assets)
    }

    fn capture_and_register(
        &self,
        destination: Option<&Path>,
        include_assets: bool,
    ) -> VaultResult<BackupRecord> {
        let scope = ObservationScope::with_fields(
            "BACKUP",
            &[("include_assets", if include_assets { "true" } else { "false" })],
        );

        let extension = if include_assets { "zip" } else { "db" };
        let (name, path) = self.allocate_destination(destination, extension)?;

        let record = if include_assets {
            let bundle = ArchiveBuilder::new(&self.creator, &self.reaper).create_bundled_backup(
                &*self.db,
                &self.config.assets_dir(),
                &self.config.work_dir(),
                &path,
            )?;
            BackupRecord::new(
                name,
                bundle.path,
                bundle.size,
                &self.config.app_version,
                BackupFormat::SqliteWithImages,
            )
        } else {
            let snapshot = self.creator.capture(&*self.db, &path, &self.reaper)?;
            BackupRecord::new(
                name,
                snapshot.path,
                snapshot.size,
                &self.config.app_version,
                BackupFormat::SqliteOnly,
            )
        };

        self.registry.add(record.clone())?;
        scope.complete_with_fields(&[
            ("name", &record.name),
            ("size", &record.size.to_string()),
        ]);
        Ok(record)
    }

    /// Registered backups whose files still exist, newest first
    pub fn list_backups(&self) -> VaultResult<Vec<BackupListing>> {
        let _ticket = self.guard.try_begin(OperationState::Maintaining)?;
        Ok(self
            .registry
            .list()?
            .into_iter()
            .map(BackupListing::from)
            .collect())
    }

    /// Delete a backup file and its registry entry
    pub fn delete_backup(&self, name: &str) -> VaultResult<BackupRecord> {
        let _ticket = self.guard.try_begin(OperationState::Maintaining)?;
        self.registry.remove(name, &self.reaper)
    }

    /// Keep the `keep` newest backups and delete the rest
    ///
    /// Returns the names removed. Stops at the first failed deletion.
    pub fn prune_backups(&self, keep: usize) -> VaultResult<Vec<String>> {
        let _ticket = self.guard.try_begin(OperationState::Maintaining)?;
        self.prune_registered(keep)
    }

    fn prune_registered(&self, keep: usize) -> VaultResult<Vec<String>> {
        let mut records = self.registry.list()?;
        records.sort_by(|a, b| b.created_at_utc().cmp(&a.created_at_utc()));

        let mut removed = Vec::new();
        for record in records.into_iter().skip(keep) {
            self.registry.remove(&record.name, &self.reaper)?;
            removed.push(record.name);
        }
        Ok(removed)
    }

    /// One scheduled pass: create a backup, then prune to the schedule's
    /// retention, both under a single guard ticket
    pub fn run_scheduled_backup(&self, schedule: &BackupSchedule) -> VaultResult<ScheduledRun> {
        let _ticket = self.guard.try_begin(OperationState::BackingUp)?;
        let scope = ObservationScope::with_fields(
            "SCHEDULED_BACKUP",
            &[("frequency", schedule.frequency().as_str())],
        );

        let record = self.capture_and_register(None, schedule.include_assets())?;
        let pruned = self.prune_registered(schedule.keep())?;

        scope.complete_with_fields(&[
            ("name", record.name.as_str()),
            ("pruned", &pruned.len().to_string()),
        ]);
        Ok(ScheduledRun { record, pruned })
    }

    /// Restore `source` over the live database
    pub fn restore_backup(
        &mut self,
        source: &Path,
        observer: &mut dyn ProgressObserver,
    ) -> VaultResult<RestoreOutcome> {
        let _ticket = self.guard.try_begin(OperationState::Restoring)?;
        let orchestrator = RestoreOrchestrator::new(
            &self.reaper,
            self.config.work_dir(),
            self.config.assets_dir(),
        )
        .with_asset_backup_retention(self.config.asset_backup_retention);
        orchestrator.restore(&mut *self.db, source, observer)
    }

    /// Register asset files that have no row yet
    pub fn synchronize_assets(&self) -> VaultResult<SyncSummary> {
        let _ticket = self.guard.try_begin(OperationState::Maintaining)?;
        Ok(synchronize_assets(
            self.db.connection()?,
            &self.config.assets_dir(),
        ))
    }

    /// Pick a free name and path for a new backup
    fn allocate_destination(
        &self,
        hint: Option<&Path>,
        extension: &str,
    ) -> VaultResult<(String, PathBuf)> {
        let (dir, stem) = match hint {
            Some(hint) => {
                let stem = hint
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(timestamped_name);
                let dir = match hint.parent() {
                    Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                (dir, stem)
            }
            None => (self.config.backup_dir(), timestamped_name()),
        };
        fs::create_dir_all(&dir).map_err(|e| VaultError::io_error_at_path(&dir, e))?;

        let mut name = stem.clone();
        let mut suffix = 1;
        loop {
            let path = dir.join(format!("{}.{}", name, extension));
            if !path.exists() && self.registry.get(&name).is_err() {
                return Ok((name, path));
            }
            name = format!("{}_{}", stem, suffix);
            suffix += 1;
        }
    }
}

fn timestamped_name() -> String {
    format!("backup_{}", Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VaultErrorCode;
    use crate::schedule::BackupFrequency;
    use tempfile::TempDir;

    fn engine(temp: &TempDir) -> BackupEngine {
        let db_path = temp.path().join("clinic.db");
        let engine = BackupEngine::open(EngineConfig::for_database(&db_path)).unwrap();
        engine
            .database()
            .connection()
            .unwrap()
            .execute_batch(
                "CREATE TABLE patients (id INTEGER PRIMARY KEY, full_name TEXT);
                 INSERT INTO patients (full_name) VALUES ('Nour');",
            )
            .unwrap();
        engine
    }

    #[test]
    fn test_hint_extension_replaced_and_collisions_suffixed() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        let hint = temp.path().join("out").join("weekly.bak");

        let first = engine.create_backup(Some(&hint), false).unwrap();
        let second = engine.create_backup(Some(&hint), false).unwrap();

        assert_eq!(first.name, "weekly");
        assert_eq!(first.path, temp.path().join("out").join("weekly.db"));
        assert_eq!(second.name, "weekly_1");
        assert_eq!(engine.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn test_default_destination_in_backup_dir() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        let record = engine.create_backup(None, false).unwrap();

        assert!(record.name.starts_with("backup_"));
        assert!(record.path.starts_with(temp.path().join("backups")));
        assert_eq!(record.backup_format, BackupFormat::SqliteOnly);
        assert!(engine.state() == OperationState::Idle);
    }

    #[test]
    fn test_busy_guard_rejects_backup() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        let _held = engine.guard().try_begin(OperationState::Restoring).unwrap();

        let err = engine.create_backup(None, false).unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::OperationInProgress);
    }

    #[test]
    fn test_engines_on_one_database_share_guard() {
        let temp = TempDir::new().unwrap();
        let first = engine(&temp);
        let second =
            BackupEngine::open(EngineConfig::for_database(temp.path().join("clinic.db"))).unwrap();

        let held = first.guard().try_begin(OperationState::Restoring).unwrap();
        let err = second.create_backup(None, false).unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::OperationInProgress);
        assert_eq!(second.state(), OperationState::Restoring);

        drop(held);
        assert!(second.create_backup(None, false).is_ok());
    }

    #[test]
    fn test_scheduled_run_creates_then_prunes() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        for i in 0..3 {
            let hint = temp.path().join(format!("old{}.db", i));
            engine.create_backup(Some(&hint), false).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let schedule = BackupSchedule::new(BackupFrequency::Daily).unwrap().with_keep(2);
        let run = engine.run_scheduled_backup(&schedule).unwrap();

        assert!(run.record.name.starts_with("backup_"));
        assert_eq!(run.pruned, vec!["old1".to_string(), "old0".to_string()]);
        let names: Vec<String> = engine
            .list_backups()
            .unwrap()
            .into_iter()
            .map(|l| l.record.name)
            .collect();
        assert_eq!(names, vec![run.record.name.clone(), "old2".to_string()]);
        assert!(engine.state() == OperationState::Idle);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        let mut names = Vec::new();
        for i in 0..4 {
            let hint = temp.path().join(format!("b{}.db", i));
            names.push(engine.create_backup(Some(&hint), false).unwrap().name);
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let removed = engine.prune_backups(2).unwrap();
        assert_eq!(removed, vec!["b1".to_string(), "b0".to_string()]);
        let left: Vec<String> = engine
            .list_backups()
            .unwrap()
            .into_iter()
            .map(|l| l.record.name)
            .collect();
        assert_eq!(left, vec!["b3".to_string(), "b2".to_string()]);
    }

    #[test]
    fn test_delete_unknown_backup() {
        let temp = TempDir::new().unwrap();
        let engine = engine(&temp);
        let err = engine.delete_backup("nope").unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::BackupNotFound);
    }
}
