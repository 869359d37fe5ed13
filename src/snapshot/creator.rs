//! Verified snapshot capture over an ordered strategy chain
//!
//! Sequence:
//!
//! 1. Checkpoint the live database (failure aborts, nothing written)
//! 2. For each strategy in order:
//!    a. capture into `<target>.candidate`
//!    b. reject empty output
//!    c. seal the candidate into a single self-contained file
//!    d. verify it; on success rename onto `<target>`
//! 3. A failing attempt is logged, its candidate removed, and the next
//!    strategy tried
//!
//! Nothing is ever left at `<target>` unless it passed verification.

use std::fs;
use std::path::{Path, PathBuf};

use super::strategies::{CaptureStrategy, OnlineBackup, RawCopy, VacuumInto};
use crate::database::{remove_sidecars, seal_snapshot, CheckpointOutcome, LiveDatabase};
use crate::errors::{VaultError, VaultErrorCode, VaultResult};
use crate::fsutil::{fsync_dir, sibling};
use crate::observability::{log_event_with_fields, Event, ObservationScope};
use crate::reaper::ReliableDelete;
use crate::verify::{IntegrityVerifier, VerificationReport};

/// A snapshot that passed verification
#[derive(Debug, Clone)]
pub struct CapturedSnapshot {
    pub path: PathBuf,
    pub size: u64,
    /// Name of the winning strategy
    pub strategy: &'static str,
    pub report: VerificationReport,
}

/// Produces verified database snapshots
pub struct BackupCreator {
    strategies: Vec<Box<dyn CaptureStrategy>>,
}

impl BackupCreator {
    /// Online backup, then `VACUUM INTO`, then raw copy
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(OnlineBackup::default()),
                Box::new(VacuumInto),
                Box::new(RawCopy),
            ],
        }
    }

    pub fn with_strategies(strategies: Vec<Box<dyn CaptureStrategy>>) -> Self {
        Self { strategies }
    }

    /// Capture a verified snapshot of `db` at `target`
    ///
    /// If every strategy fails and at least one produced a file that
    /// failed verification, the verification error is returned;
    /// otherwise `VAULT_SNAPSHOT_STRATEGY_FAILED` with the last cause.
    pub fn capture(
        &self,
        db: &dyn LiveDatabase,
        target: &Path,
        reaper: &dyn ReliableDelete,
    ) -> VaultResult<CapturedSnapshot> {
        let target_display = target.display().to_string();
        let scope = ObservationScope::with_fields("SNAPSHOT_CAPTURE", &[("target", &target_display)]);

        let checkpoint = db.checkpoint().map_err(|e| {
            VaultError::snapshot_strategy_failed("Write-ahead log checkpoint failed", Some(e))
        })?;

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| VaultError::io_error_at_path(parent, e))?;
            }
        }

        let candidate = sibling(target, ".candidate");
        let mut last_failure: Option<VaultError> = None;
        let mut verification_failure: Option<VaultError> = None;

        for strategy in &self.strategies {
            discard(&candidate, reaper);
            log_event_with_fields(
                Event::CaptureStrategyAttempt,
                &[("strategy", strategy.name()), ("target", &target_display)],
            );

            match attempt(strategy.as_ref(), db, &candidate, checkpoint) {
                Ok((size, report)) => {
                    fs::rename(&candidate, target)
                        .map_err(|e| VaultError::io_error_at_path(target, e))?;
                    let _ = remove_sidecars(&candidate);
                    if let Some(parent) = target.parent() {
                        fsync_dir(parent)?;
                    }
                    scope.complete_with_fields(&[
                        ("strategy", strategy.name()),
                        ("size", &size.to_string()),
                    ]);
                    return Ok(CapturedSnapshot {
                        path: target.to_path_buf(),
                        size,
                        strategy: strategy.name(),
                        report,
                    });
                }
                Err(e) => {
                    log_event_with_fields(
                        Event::CaptureStrategyFailed,
                        &[("strategy", strategy.name()), ("error", &e.to_string())],
                    );
                    discard(&candidate, reaper);
                    if e.code() == VaultErrorCode::IntegrityCheckFailed {
                        verification_failure = Some(e);
                    } else {
                        last_failure = Some(e);
                    }
                }
            }
        }

        let err = match verification_failure {
            Some(verify_err) => verify_err,
            None => VaultError::snapshot_strategy_failed(
                format!("All {} capture strategies failed", self.strategies.len()),
                last_failure,
            ),
        };
        scope.fail(err.message());
        Err(err)
    }
}

impl Default for BackupCreator {
    fn default() -> Self {
        Self::new()
    }
}

fn attempt(
    strategy: &dyn CaptureStrategy,
    db: &dyn LiveDatabase,
    candidate: &Path,
    checkpoint: CheckpointOutcome,
) -> VaultResult<(u64, VerificationReport)> {
    strategy.capture(db, candidate, checkpoint)?;

    let size = fs::metadata(candidate)
        .map_err(|e| VaultError::io_error_at_path(candidate, e))?
        .len();
    if size == 0 {
        return Err(VaultError::io_error_at_path(
            candidate,
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "capture produced an empty file"),
        ));
    }

    seal_snapshot(candidate)?;
    let report = IntegrityVerifier::verify(candidate)?;
    let size = fs::metadata(candidate)
        .map_err(|e| VaultError::io_error_at_path(candidate, e))?
        .len();
    Ok((size, report))
}

fn discard(candidate: &Path, reaper: &dyn ReliableDelete) {
    let _ = reaper.remove_tree(candidate);
    let _ = remove_sidecars(candidate);
    let _ = reaper.remove_tree(&sibling(candidate, "-journal"));
}
