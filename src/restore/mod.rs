//! Restore of a backup over the live database
//!
//! # Algorithm
//!
//! 1. Classify the source (missing or unknown: no change)
//! 2. Copy the live database to a rollback snapshot
//! 3. Extract a bundle to a work directory
//! 4. Verify the database candidate (failure: no change)
//! 5. Close, replace and reopen the live database
//! 6. Probe the restored database
//! 7. Bundles only: swap the asset tree and reconcile asset rows
//! 8. Remove temporary artifacts, age out old asset copies
//!
//! Steps 5 to 7 form the irreversible window. Any failure inside it
//! copies the rollback snapshot (and the pre-restore asset tree) back
//! and reports `VAULT_RESTORE_SWAP_FAILED`. A failed rollback is the only
//! FATAL outcome; its snapshot is left on disk.
//!
//! Legacy JSON exports skip steps 2 to 7 and replay rows inside one
//! transaction instead.

mod classify;
mod progress;
mod session;

pub use classify::{classify, CandidateKind, RestoreCandidate};
pub use progress::{NoProgress, ProgressObserver, ProgressUpdate, RestoreStage};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::assets::{ImageReconciler, ReconcileSummary};
use crate::archive::extract_bundle;
use crate::database::{remove_sidecars, LiveDatabase};
use crate::errors::{VaultError, VaultResult};
use crate::fault_point::{self, points};
use crate::fsutil::{copy_tree, copy_verified, replace_file};
use crate::legacy::{self, LegacyExport};
use crate::observability::{log_event_with_fields, Event, ObservationScope};
use crate::reaper::{DirectoryReaper, ReliableDelete};
use crate::verify::{IntegrityVerifier, VerificationReport};

use progress::ProgressTracker;
use session::{AssetRollback, RestoreSession, ASSET_BACKUP_PREFIX};

/// Result of a successful restore
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreOutcome {
    pub source: PathBuf,
    /// Row counts of the restored database
    pub row_counts: BTreeMap<String, i64>,
    /// Files copied into the asset tree
    pub asset_files: usize,
    pub reconciled: Option<ReconcileSummary>,
    /// Legacy replay only: rows inserted per table
    pub legacy_rows: Option<BTreeMap<String, usize>>,
}

/// Drives one restore against a live database
pub struct RestoreOrchestrator<'a> {
    reaper: &'a DirectoryReaper,
    work_dir: PathBuf,
    assets_dir: PathBuf,
    asset_backup_retention: usize,
}

impl<'a> RestoreOrchestrator<'a> {
    pub fn new(
        reaper: &'a DirectoryReaper,
        work_dir: impl Into<PathBuf>,
        assets_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            reaper,
            work_dir: work_dir.into(),
            assets_dir: assets_dir.into(),
            asset_backup_retention: 2,
        }
    }

    /// Number of older pre-restore asset copies to keep
    pub fn with_asset_backup_retention(mut self, keep: usize) -> Self {
        self.asset_backup_retention = keep;
        self
    }

    /// Restore `source` over `db`, reporting progress to `observer`
    pub fn restore(
        &self,
        db: &mut dyn LiveDatabase,
        source: &Path,
        observer: &mut dyn ProgressObserver,
    ) -> VaultResult<RestoreOutcome> {
        let scope = ObservationScope::with_fields(
            "RESTORE",
            &[("source", source.display().to_string().as_str())],
        );
        let mut progress = ProgressTracker::new(observer);
        progress.advance(RestoreStage::Init);

        let result = classify(source).and_then(|candidate| match candidate.kind {
            CandidateKind::LegacyExport => self.restore_legacy(db, &candidate, &mut progress),
            _ => self.restore_file(db, &candidate, &mut progress),
        });

        match &result {
            Ok(outcome) => scope.complete_with_fields(&[
                ("tables", &outcome.row_counts.len().to_string()),
                ("asset_files", &outcome.asset_files.to_string()),
            ]),
            Err(e) if e.is_fatal() => scope.fail_fatal(&e.to_string()),
            Err(e) => scope.fail(&format!("{} at stage {}", e, progress.stage().as_str())),
        }
        result
    }

    fn restore_legacy(
        &self,
        db: &mut dyn LiveDatabase,
        candidate: &RestoreCandidate,
        progress: &mut ProgressTracker<'_>,
    ) -> VaultResult<RestoreOutcome> {
        let export = LegacyExport::load(&candidate.path)?;
        progress.advance_with(RestoreStage::ReplacingDb, "Replaying legacy export");
        let rows = legacy::replay(db.connection()?, &export)?;

        progress.advance(RestoreStage::Complete);
        Ok(RestoreOutcome {
            source: candidate.path.clone(),
            legacy_rows: Some(rows),
            ..RestoreOutcome::default()
        })
    }

    fn restore_file(
        &self,
        db: &mut dyn LiveDatabase,
        candidate: &RestoreCandidate,
        progress: &mut ProgressTracker<'_>,
    ) -> VaultResult<RestoreOutcome> {
        std::fs::create_dir_all(&self.work_dir)
            .map_err(|e| VaultError::io_error_at_path(&self.work_dir, e))?;
        let mut session = RestoreSession::new(&self.work_dir, self.reaper);

        progress.advance(RestoreStage::BackupCurrent);
        self.stage_rollback(db, &mut session)?;

        let (database, assets) = match candidate.kind {
            CandidateKind::Bundle => {
                progress.advance(RestoreStage::Extracting);
                let target = session.extraction_target();
                session.set_extraction(target.clone());
                let bundle = extract_bundle(&candidate.path, &target)?;
                (bundle.database, bundle.assets)
            }
            _ => (candidate.path.clone(), None),
        };

        let report = IntegrityVerifier::verify(&database).map_err(|e| {
            VaultError::restore_candidate_invalid(
                format!("Restore candidate failed verification: {}", candidate.path.display()),
                e,
            )
        })?;

        let swapped = self.swap(db, &database, assets.as_deref(), &report, &mut session, progress);
        let (row_counts, asset_files, reconciled) = match swapped {
            Ok(done) => done,
            Err(cause) => return Err(self.rollback(db, &mut session, cause)),
        };

        progress.advance(RestoreStage::Cleanup);
        session.release();
        if assets.is_some() {
            if let Err(e) = self.reaper.sweep_retention(
                session.work_dir(),
                ASSET_BACKUP_PREFIX,
                self.asset_backup_retention,
                session.current_asset_backup(),
            ) {
                log_event_with_fields(
                    Event::TempArtifactLeaked,
                    &[
                        ("path", &session.work_dir().display().to_string()),
                        ("error", &e.to_string()),
                    ],
                );
            }
        }

        progress.advance(RestoreStage::Complete);
        Ok(RestoreOutcome {
            source: candidate.path.clone(),
            row_counts,
            asset_files,
            reconciled,
            legacy_rows: None,
        })
    }

    /// Copy the live file aside; nothing destructive happens before this
    fn stage_rollback(
        &self,
        db: &mut dyn LiveDatabase,
        session: &mut RestoreSession<'_>,
    ) -> VaultResult<()> {
        db.checkpoint()?;
        let target = session.rollback_target();
        session.set_rollback(target.clone());
        copy_verified(db.path(), &target)?;
        fault_point::check(points::RESTORE_AFTER_ROLLBACK_SNAPSHOT)
            .map_err(|e| VaultError::io_error("Rollback snapshot interrupted", e))?;

        log_event_with_fields(
            Event::RestoreRollbackSnapshot,
            &[("path", &target.display().to_string())],
        );
        Ok(())
    }

    /// The irreversible window
    fn swap(
        &self,
        db: &mut dyn LiveDatabase,
        database: &Path,
        assets: Option<&Path>,
        report: &VerificationReport,
        session: &mut RestoreSession<'_>,
        progress: &mut ProgressTracker<'_>,
    ) -> VaultResult<(BTreeMap<String, i64>, usize, Option<ReconcileSummary>)> {
        let live = db.path().to_path_buf();

        progress.advance(RestoreStage::ReplacingDb);
        db.close()?;
        fault_point::check(points::RESTORE_AFTER_CLOSE)
            .map_err(|e| VaultError::io_error("Swap interrupted after close", e))?;
        remove_sidecars(&live)?;
        replace_file(database, &live)?;
        fault_point::check(points::RESTORE_AFTER_REPLACE)
            .map_err(|e| VaultError::io_error("Swap interrupted after replace", e))?;

        progress.advance(RestoreStage::Reinitializing);
        db.reinitialize()?;
        fault_point::check(points::RESTORE_AFTER_REINITIALIZE)
            .map_err(|e| VaultError::io_error("Swap interrupted after reinitialize", e))?;
        let row_counts = IntegrityVerifier::probe_after_swap(db.connection()?, report)?;
        log_event_with_fields(
            Event::RestoreSwapCommitted,
            &[("path", &live.display().to_string())],
        );

        let Some(extracted) = assets else {
            return Ok((row_counts, 0, None));
        };

        progress.advance(RestoreStage::RestoringAssets);
        let asset_files = self.swap_assets(extracted, session)?;

        progress.advance(RestoreStage::UpdatingPaths);
        let summary = ImageReconciler::new(db.connection()?, &self.assets_dir).reconcile();
        Ok((row_counts, asset_files, Some(summary)))
    }

    fn swap_assets(&self, extracted: &Path, session: &mut RestoreSession<'_>) -> VaultResult<usize> {
        if self.assets_dir.exists() {
            let backup = session.asset_backup_target();
            copy_tree(&self.assets_dir, &backup)?;
            session.assets = AssetRollback::Copied(backup);
        } else {
            session.assets = AssetRollback::Absent;
        }

        self.reaper.remove_tree(&self.assets_dir)?;
        fault_point::check(points::RESTORE_DURING_ASSETS)
            .map_err(|e| VaultError::io_error("Asset restore interrupted", e))?;
        copy_tree(extracted, &self.assets_dir)
    }

    /// Undo a failed swap; returns the error to report
    fn rollback(
        &self,
        db: &mut dyn LiveDatabase,
        session: &mut RestoreSession<'_>,
        cause: VaultError,
    ) -> VaultError {
        let Some(snapshot) = session.rollback_path().map(Path::to_path_buf) else {
            return VaultError::rollback_failed("No rollback snapshot was staged", cause);
        };
        log_event_with_fields(
            Event::RestoreRollbackBegin,
            &[
                ("snapshot", &snapshot.display().to_string()),
                ("cause", &cause.to_string()),
            ],
        );

        match self.undo(db, &snapshot, &session.assets) {
            Ok(()) => {
                log_event_with_fields(
                    Event::RestoreRollbackComplete,
                    &[("snapshot", &snapshot.display().to_string())],
                );
                VaultError::restore_swap_failed("Restore failed and was rolled back", cause)
            }
            Err(e) => {
                let kept = session.keep_rollback().unwrap_or(snapshot);
                log_event_with_fields(
                    Event::RestoreRollbackFailed,
                    &[
                        ("snapshot", &kept.display().to_string()),
                        ("error", &e.to_string()),
                        ("cause", &cause.to_string()),
                    ],
                );
                VaultError::rollback_failed(
                    format!(
                        "Rollback failed after {}; pre-restore database kept at {}",
                        cause.message(),
                        kept.display()
                    ),
                    e,
                )
            }
        }
    }

    fn undo(
        &self,
        db: &mut dyn LiveDatabase,
        snapshot: &Path,
        assets: &AssetRollback,
    ) -> VaultResult<()> {
        let live = db.path().to_path_buf();
        db.close()?;
        remove_sidecars(&live)?;
        replace_file(snapshot, &live)?;
        db.reinitialize()?;

        match assets {
            AssetRollback::Untouched => {}
            AssetRollback::Absent => self.reaper.remove_tree(&self.assets_dir)?,
            AssetRollback::Copied(copy) => {
                self.reaper.remove_tree(&self.assets_dir)?;
                copy_tree(copy, &self.assets_dir)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{count_rows, SqliteDatabase};
    use crate::errors::VaultErrorCode;
    use crate::snapshot::BackupCreator;
    use std::fs;
    use tempfile::TempDir;

    fn seeded(path: &Path, rows: i64) -> SqliteDatabase {
        let db = SqliteDatabase::open(path).unwrap();
        let conn = db.connection().unwrap();
        conn.execute_batch("CREATE TABLE patients (id INTEGER PRIMARY KEY, full_name TEXT);")
            .unwrap();
        for i in 0..rows {
            conn.execute("INSERT INTO patients (full_name) VALUES (?1)", [format!("p{}", i)])
                .unwrap();
        }
        db
    }

    fn snapshot_of(db: &SqliteDatabase, target: &Path, reaper: &DirectoryReaper) {
        BackupCreator::new().capture(db, target, reaper).unwrap();
    }

    #[test]
    fn test_db_only_restore_replaces_rows() {
        let temp = TempDir::new().unwrap();
        let reaper = DirectoryReaper::new();
        let mut live = seeded(&temp.path().join("live.db"), 3);
        let backup = temp.path().join("backup.db");
        snapshot_of(&live, &backup, &reaper);
        live.connection()
            .unwrap()
            .execute("DELETE FROM patients", [])
            .unwrap();

        let orchestrator =
            RestoreOrchestrator::new(&reaper, temp.path().join("work"), temp.path().join("imgs"));
        let mut stages = Vec::new();
        let mut observer = |u: &ProgressUpdate| stages.push(u.stage);
        let outcome = orchestrator.restore(&mut live, &backup, &mut observer).unwrap();

        assert_eq!(outcome.row_counts.get("patients"), Some(&3));
        assert_eq!(count_rows(live.connection().unwrap(), "patients").unwrap(), 3);
        assert_eq!(
            stages,
            vec![
                RestoreStage::Init,
                RestoreStage::BackupCurrent,
                RestoreStage::ReplacingDb,
                RestoreStage::Reinitializing,
                RestoreStage::Cleanup,
                RestoreStage::Complete,
            ]
        );
        let leftovers: Vec<_> = fs::read_dir(temp.path().join("work")).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_invalid_candidate_leaves_live_untouched() {
        let temp = TempDir::new().unwrap();
        let reaper = DirectoryReaper::new();
        let mut live = seeded(&temp.path().join("live.db"), 2);
        let empty = temp.path().join("empty.db");
        rusqlite::Connection::open(&empty)
            .unwrap()
            .execute_batch("PRAGMA user_version = 1;")
            .unwrap();

        let orchestrator =
            RestoreOrchestrator::new(&reaper, temp.path().join("work"), temp.path().join("imgs"));
        let err = orchestrator
            .restore(&mut live, &empty, &mut NoProgress)
            .unwrap_err();

        assert_eq!(err.code(), VaultErrorCode::RestoreCandidateInvalid);
        assert!(live.is_open());
        assert_eq!(count_rows(live.connection().unwrap(), "patients").unwrap(), 2);
    }

    #[test]
    fn test_fault_after_replace_rolls_back() {
        let temp = TempDir::new().unwrap();
        let reaper = DirectoryReaper::new();
        let other = seeded(&temp.path().join("other.db"), 7);
        let backup = temp.path().join("backup.db");
        snapshot_of(&other, &backup, &reaper);

        let mut live = seeded(&temp.path().join("live.db"), 2);
        let orchestrator =
            RestoreOrchestrator::new(&reaper, temp.path().join("work"), temp.path().join("imgs"));

        let _fault = fault_point::arm(points::RESTORE_AFTER_REPLACE);
        let err = orchestrator
            .restore(&mut live, &backup, &mut NoProgress)
            .unwrap_err();

        assert_eq!(err.code(), VaultErrorCode::RestoreSwapFailed);
        assert!(!err.is_fatal());
        assert!(live.is_open());
        assert_eq!(count_rows(live.connection().unwrap(), "patients").unwrap(), 2);
    }

    #[test]
    fn test_missing_source_has_no_side_effects() {
        let temp = TempDir::new().unwrap();
        let reaper = DirectoryReaper::new();
        let mut live = seeded(&temp.path().join("live.db"), 1);
        let work = temp.path().join("work");
        let orchestrator = RestoreOrchestrator::new(&reaper, &work, temp.path().join("imgs"));

        let err = orchestrator
            .restore(&mut live, Path::new("/does/not/exist"), &mut NoProgress)
            .unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::SourceUnavailable);
        assert!(!work.exists());
    }
}
