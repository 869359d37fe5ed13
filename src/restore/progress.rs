//! Restore stages and progress reporting

use serde::Serialize;

use crate::observability::{log_event_with_fields, Event};

/// Stages of one restore, in order
///
/// `Extracting`, `RestoringAssets` and `UpdatingPaths` only occur for
/// bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStage {
    Init,
    BackupCurrent,
    Extracting,
    ReplacingDb,
    Reinitializing,
    RestoringAssets,
    UpdatingPaths,
    Cleanup,
    Complete,
}

impl RestoreStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreStage::Init => "init",
            RestoreStage::BackupCurrent => "backup_current",
            RestoreStage::Extracting => "extracting",
            RestoreStage::ReplacingDb => "replacing_db",
            RestoreStage::Reinitializing => "reinitializing",
            RestoreStage::RestoringAssets => "restoring_assets",
            RestoreStage::UpdatingPaths => "updating_paths",
            RestoreStage::Cleanup => "cleanup",
            RestoreStage::Complete => "complete",
        }
    }

    pub fn percent(&self) -> u8 {
        match self {
            RestoreStage::Init => 0,
            RestoreStage::BackupCurrent => 10,
            RestoreStage::Extracting => 30,
            RestoreStage::ReplacingDb => 45,
            RestoreStage::Reinitializing => 55,
            RestoreStage::RestoringAssets => 70,
            RestoreStage::UpdatingPaths => 85,
            RestoreStage::Cleanup => 95,
            RestoreStage::Complete => 100,
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            RestoreStage::Init => "Starting restore",
            RestoreStage::BackupCurrent => "Saving a copy of the current database",
            RestoreStage::Extracting => "Extracting backup bundle",
            RestoreStage::ReplacingDb => "Replacing database",
            RestoreStage::Reinitializing => "Reopening database",
            RestoreStage::RestoringAssets => "Restoring treatment images",
            RestoreStage::UpdatingPaths => "Updating image paths",
            RestoreStage::Cleanup => "Removing temporary files",
            RestoreStage::Complete => "Restore complete",
        }
    }
}

/// One progress notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub stage: RestoreStage,
    pub message: String,
    pub percent: u8,
}

/// Receives progress after each stage transition
pub trait ProgressObserver {
    fn on_progress(&mut self, update: &ProgressUpdate);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&ProgressUpdate),
{
    fn on_progress(&mut self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Observer that ignores every update
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _update: &ProgressUpdate) {}
}

/// Tracks the current stage and keeps reported percent non-decreasing
pub(crate) struct ProgressTracker<'a> {
    observer: &'a mut dyn ProgressObserver,
    stage: RestoreStage,
    percent: u8,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(observer: &'a mut dyn ProgressObserver) -> Self {
        Self {
            observer,
            stage: RestoreStage::Init,
            percent: 0,
        }
    }

    pub(crate) fn stage(&self) -> RestoreStage {
        self.stage
    }

    pub(crate) fn advance(&mut self, stage: RestoreStage) {
        self.advance_with(stage, stage.default_message());
    }

    pub(crate) fn advance_with(&mut self, stage: RestoreStage, message: &str) {
        self.stage = stage;
        self.percent = self.percent.max(stage.percent()).min(100);
        log_event_with_fields(
            Event::RestoreStage,
            &[
                ("stage", stage.as_str()),
                ("percent", &self.percent.to_string()),
            ],
        );
        self.observer.on_progress(&ProgressUpdate {
            stage,
            message: message.to_string(),
            percent: self.percent,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_never_decreases() {
        let mut seen = Vec::new();
        let mut observer = |u: &ProgressUpdate| seen.push(u.percent);
        {
            let mut tracker = ProgressTracker::new(&mut observer);
            tracker.advance(RestoreStage::Init);
            tracker.advance(RestoreStage::Reinitializing);
            tracker.advance(RestoreStage::Extracting);
            tracker.advance(RestoreStage::Complete);
            assert_eq!(tracker.stage(), RestoreStage::Complete);
        }
        assert_eq!(seen, vec![0, 55, 55, 100]);
    }

    #[test]
    fn test_stage_percent_order_matches_stage_order() {
        let stages = [
            RestoreStage::Init,
            RestoreStage::BackupCurrent,
            RestoreStage::Extracting,
            RestoreStage::ReplacingDb,
            RestoreStage::Reinitializing,
            RestoreStage::RestoringAssets,
            RestoreStage::UpdatingPaths,
            RestoreStage::Cleanup,
            RestoreStage::Complete,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].percent() < pair[1].percent());
        }
    }

    #[test]
    fn test_stage_serializes_as_key() {
        let update = ProgressUpdate {
            stage: RestoreStage::BackupCurrent,
            message: "x".to_string(),
            percent: 10,
        };
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"stage\":\"backup_current\""));
    }
}
