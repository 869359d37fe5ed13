//! Reliable deletion of files and directory trees
//!
//! Temporary state the engine creates (rollback snapshots, extraction
//! directories, pre-restore asset copies) must actually go away. The
//! reaper tries a ranked list of removal strategies and only reports
//! failure once every rung has given up.
//!
//! # Rungs
//!
//! 1. `NativeRemove`: recursive remove, retried with linear backoff
//! 2. `ManualWalk`: per-entry removal with exponential backoff
//! 3. `ShellRemove`: Windows only, `rmdir /s /q`

mod scoped;
mod strategies;

pub use scoped::TempArtifact;
#[cfg(windows)]
pub use strategies::ShellRemove;
pub use strategies::{ManualWalk, NativeRemove, RemovalStrategy};

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::errors::{VaultError, VaultResult};
use crate::observability::{log_event_with_fields, Event};

/// Capability to delete a path for certain
pub trait ReliableDelete {
    /// Remove a file or tree; a missing path is success
    fn remove_tree(&self, path: &Path) -> VaultResult<()>;
}

/// Escalating removal over a ranked strategy list
pub struct DirectoryReaper {
    strategies: Vec<Box<dyn RemovalStrategy>>,
}

impl DirectoryReaper {
    /// Default ladder for the current platform
    pub fn new() -> Self {
        #[allow(unused_mut)]
        let mut strategies: Vec<Box<dyn RemovalStrategy>> = vec![
            Box::new(NativeRemove::default()),
            Box::new(ManualWalk::default()),
        ];
        #[cfg(windows)]
        strategies.push(Box::new(ShellRemove));
        Self { strategies }
    }

    pub fn with_strategies(strategies: Vec<Box<dyn RemovalStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Delete all but the `keep` newest entries matching `prefix` in `dir`
    ///
    /// Entries are ordered by the numeric suffix after the last `_`
    /// (a millisecond timestamp), falling back to modification time.
    /// `exclude` is never considered. Returns the removed paths; removal
    /// failures are logged and skipped.
    pub fn sweep_retention(
        &self,
        dir: &Path,
        prefix: &str,
        keep: usize,
        exclude: Option<&Path>,
    ) -> VaultResult<Vec<PathBuf>> {
        let pattern = format!(
            "{}/{}*",
            glob::Pattern::escape(&dir.to_string_lossy()),
            glob::Pattern::escape(prefix)
        );
        let entries = glob::glob(&pattern)
            .map_err(|e| VaultError::registry(format!("Invalid retention pattern: {}", e)))?;

        let mut candidates: Vec<(u128, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|p| exclude.map_or(true, |ex| p.as_path() != ex))
            .map(|p| (age_key(&p), p))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = Vec::new();
        for (_, path) in candidates.into_iter().skip(keep) {
            match self.remove_tree(&path) {
                Ok(()) => {
                    log_event_with_fields(
                        Event::RetentionSweepRemoved,
                        &[("path", &path.display().to_string())],
                    );
                    removed.push(path);
                }
                Err(e) => {
                    log_event_with_fields(
                        Event::ReaperExhausted,
                        &[
                            ("path", &path.display().to_string()),
                            ("error", &e.to_string()),
                        ],
                    );
                }
            }
        }
        Ok(removed)
    }
}

impl Default for DirectoryReaper {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliableDelete for DirectoryReaper {
    fn remove_tree(&self, path: &Path) -> VaultResult<()> {
        if std::fs::symlink_metadata(path).is_err() {
            return Ok(());
        }

        let display = path.display().to_string();
        let mut last_failure = None;

        for strategy in &self.strategies {
            match strategy.remove(path) {
                Ok(()) if std::fs::symlink_metadata(path).is_err() => return Ok(()),
                Ok(()) => {
                    log_event_with_fields(
                        Event::ReaperRungFailed,
                        &[
                            ("path", &display),
                            ("strategy", strategy.name()),
                            ("error", "path still present"),
                        ],
                    );
                }
                Err(e) => {
                    log_event_with_fields(
                        Event::ReaperRungFailed,
                        &[
                            ("path", &display),
                            ("strategy", strategy.name()),
                            ("error", &e.to_string()),
                        ],
                    );
                    last_failure = Some(e);
                }
            }
        }

        log_event_with_fields(Event::ReaperExhausted, &[("path", &display)]);
        let cause = last_failure.unwrap_or_else(|| {
            VaultError::io_error_at_path(
                path,
                std::io::Error::new(std::io::ErrorKind::Other, "path survived every strategy"),
            )
        });
        Err(VaultError::delete_failed(path, cause))
    }
}

fn age_key(path: &Path) -> u128 {
    let suffix = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('_').next())
        .and_then(|s| s.parse::<u128>().ok());
    if let Some(stamp) = suffix {
        return stamp;
    }
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
