//! Scoped cleanup of temporary engine artifacts

use std::path::{Path, PathBuf};

use super::ReliableDelete;
use crate::observability::{log_event_with_fields, Event};

/// Removes its path when dropped, on every exit path
///
/// A cleanup failure is logged and never replaces the outcome of the
/// operation that owned the artifact. `keep` hands the path back and
/// disables removal, for artifacts that must survive (a rollback
/// snapshot after a failed rollback).
pub struct TempArtifact<'a> {
    path: Option<PathBuf>,
    reaper: &'a dyn ReliableDelete,
}

impl<'a> TempArtifact<'a> {
    pub fn new(path: impl Into<PathBuf>, reaper: &'a dyn ReliableDelete) -> Self {
        Self {
            path: Some(path.into()),
            reaper,
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Stop tracking the path and leave it on disk
    pub fn keep(mut self) -> PathBuf {
        self.path.take().unwrap_or_default()
    }
}

impl Drop for TempArtifact<'_> {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = self.reaper.remove_tree(&path) {
                log_event_with_fields(
                    Event::TempArtifactLeaked,
                    &[
                        ("path", &path.display().to_string()),
                        ("error", &e.to_string()),
                    ],
                );
            }
        }
    }
}
