//! Transient state of one restore call

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::reaper::{ReliableDelete, TempArtifact};

pub(crate) const ROLLBACK_PREFIX: &str = "current_db_backup_";
pub(crate) const EXTRACT_PREFIX: &str = "restore_extract_";
pub(crate) const ASSET_BACKUP_PREFIX: &str = "current_images_backup_";

/// What the asset tree looked like before the restore touched it
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AssetRollback {
    /// Not modified
    Untouched,
    /// Did not exist
    Absent,
    /// Copied aside to this directory
    Copied(PathBuf),
}

/// Temporary artifacts owned by one restore
///
/// The rollback snapshot and extraction directory are removed when the
/// session is dropped unless `keep_rollback` was called. The pre-restore
/// asset copy outlives the session and is aged out by the retention sweep.
pub(crate) struct RestoreSession<'a> {
    work_dir: PathBuf,
    reaper: &'a dyn ReliableDelete,
    stamp: i64,
    rollback: Option<TempArtifact<'a>>,
    extraction: Option<TempArtifact<'a>>,
    pub(crate) assets: AssetRollback,
}

impl<'a> RestoreSession<'a> {
    pub(crate) fn new(work_dir: &Path, reaper: &'a dyn ReliableDelete) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            reaper,
            stamp: Utc::now().timestamp_millis(),
            rollback: None,
            extraction: None,
            assets: AssetRollback::Untouched,
        }
    }

    pub(crate) fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub(crate) fn rollback_target(&self) -> PathBuf {
        self.work_dir
            .join(format!("{}{}.db", ROLLBACK_PREFIX, self.stamp))
    }

    pub(crate) fn extraction_target(&self) -> PathBuf {
        self.work_dir.join(format!("{}{}", EXTRACT_PREFIX, self.stamp))
    }

    pub(crate) fn asset_backup_target(&self) -> PathBuf {
        self.work_dir
            .join(format!("{}{}", ASSET_BACKUP_PREFIX, self.stamp))
    }

    /// Track a written rollback snapshot
    pub(crate) fn set_rollback(&mut self, path: PathBuf) {
        self.rollback = Some(TempArtifact::new(path, self.reaper));
    }

    pub(crate) fn rollback_path(&self) -> Option<&Path> {
        self.rollback.as_ref().map(TempArtifact::path)
    }

    /// Leave the rollback snapshot on disk past the session
    pub(crate) fn keep_rollback(&mut self) -> Option<PathBuf> {
        self.rollback.take().map(TempArtifact::keep)
    }

    /// Track the extraction directory before anything is written to it
    pub(crate) fn set_extraction(&mut self, path: PathBuf) {
        self.extraction = Some(TempArtifact::new(path, self.reaper));
    }

    /// Drop the temporary artifacts now
    pub(crate) fn release(&mut self) {
        self.extraction = None;
        self.rollback = None;
    }

    pub(crate) fn current_asset_backup(&self) -> Option<&Path> {
        match &self.assets {
            AssetRollback::Copied(path) => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reaper::DirectoryReaper;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_artifacts_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let reaper = DirectoryReaper::new();
        let (rollback, extraction) = {
            let mut session = RestoreSession::new(temp.path(), &reaper);
            let rollback = session.rollback_target();
            let extraction = session.extraction_target();
            fs::write(&rollback, b"db").unwrap();
            fs::create_dir_all(extraction.join("dental_images")).unwrap();
            session.set_rollback(rollback.clone());
            session.set_extraction(extraction.clone());
            assert_eq!(session.rollback_path(), Some(rollback.as_path()));
            (rollback, extraction)
        };
        assert!(!rollback.exists());
        assert!(!extraction.exists());
    }

    #[test]
    fn test_kept_rollback_survives() {
        let temp = TempDir::new().unwrap();
        let reaper = DirectoryReaper::new();
        let kept = {
            let mut session = RestoreSession::new(temp.path(), &reaper);
            let rollback = session.rollback_target();
            fs::write(&rollback, b"db").unwrap();
            session.set_rollback(rollback);
            session.keep_rollback().unwrap()
        };
        assert!(kept.is_file());
        assert!(kept
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(ROLLBACK_PREFIX));
    }
}
