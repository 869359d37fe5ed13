//! Capture strategies, in fallback order
//!
//! Each strategy writes a complete database file at `target`, which
//! does not exist when `capture` is called.

use std::fs;
use std::path::Path;
use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::Connection;

use crate::database::{CheckpointOutcome, LiveDatabase};
use crate::errors::{VaultError, VaultResult};
use crate::fault_point::{self, points};
use crate::fsutil::copy_file_synced;

/// One way of producing a database snapshot
pub trait CaptureStrategy {
    fn name(&self) -> &'static str;

    fn capture(
        &self,
        db: &dyn LiveDatabase,
        target: &Path,
        checkpoint: CheckpointOutcome,
    ) -> VaultResult<()>;
}

fn injected(point: &'static str, target: &Path) -> VaultResult<()> {
    fault_point::check(point).map_err(|e| VaultError::io_error_at_path(target, e))
}

/// SQLite online backup API, page-streaming while the database stays live
pub struct OnlineBackup {
    pages_per_step: i32,
    pause: Duration,
}

impl Default for OnlineBackup {
    fn default() -> Self {
        Self {
            pages_per_step: 256,
            pause: Duration::from_millis(5),
        }
    }
}

impl CaptureStrategy for OnlineBackup {
    fn name(&self) -> &'static str {
        "online_backup"
    }

    fn capture(&self, db: &dyn LiveDatabase, target: &Path, _: CheckpointOutcome) -> VaultResult<()> {
        injected(points::CAPTURE_ONLINE_BACKUP, target)?;

        let src = db.connection()?;
        let mut dst = Connection::open(target).map_err(|e| {
            VaultError::database(format!("Failed to create {}", target.display()), e)
        })?;
        {
            let backup = Backup::new(src, &mut dst)?;
            backup.run_to_completion(self.pages_per_step, self.pause, None)?;
        }
        dst.close()
            .map_err(|(_, e)| VaultError::database("Failed to close backup target", e))?;
        Ok(())
    }
}

/// `VACUUM INTO`, a single-statement export to a new file
pub struct VacuumInto;

impl CaptureStrategy for VacuumInto {
    fn name(&self) -> &'static str {
        "vacuum_into"
    }

    fn capture(&self, db: &dyn LiveDatabase, target: &Path, _: CheckpointOutcome) -> VaultResult<()> {
        injected(points::CAPTURE_VACUUM_INTO, target)?;

        let target_str = target.to_str().ok_or_else(|| {
            VaultError::io_error_at_path(
                target,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path is not UTF-8"),
            )
        })?;
        db.connection()?.execute("VACUUM INTO ?1", [target_str])?;
        Ok(())
    }
}

/// Byte copy of the main database file
///
/// Only sound after a complete checkpoint; refuses otherwise, since the
/// main file alone would be missing committed pages.
pub struct RawCopy;

impl CaptureStrategy for RawCopy {
    fn name(&self) -> &'static str {
        "raw_copy"
    }

    fn capture(
        &self,
        db: &dyn LiveDatabase,
        target: &Path,
        checkpoint: CheckpointOutcome,
    ) -> VaultResult<()> {
        injected(points::CAPTURE_RAW_COPY, target)?;

        if checkpoint == CheckpointOutcome::Busy {
            return Err(VaultError::io_error_at_path(
                db.path(),
                std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "checkpoint incomplete; raw copy would miss committed pages",
                ),
            ));
        }
        if !fs::metadata(db.path()).map(|m| m.is_file()).unwrap_or(false) {
            return Err(VaultError::source_unavailable(format!(
                "Live database file missing: {}",
                db.path().display()
            )));
        }
        copy_file_synced(db.path(), target)?;
        Ok(())
    }
}
