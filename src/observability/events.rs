//! Engine lifecycle events
//!
//! Every event the engine emits outside an `ObservationScope` is named
//! here, so the full vocabulary of the log can be read in one place.

use std::fmt;

use super::logger::Severity;

/// Discrete engine events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    ConfigLoaded,

    // Capture
    CheckpointBusy,
    CaptureStrategyAttempt,
    CaptureStrategyFailed,
    SnapshotVerified,
    SnapshotRejected,
    BundleWritten,

    // Registry
    RegistryLoaded,
    RegistryCorrupt,
    RegistryEntryEvicted,
    RegistryEntryRemoved,

    // Restore
    RestoreStage,
    RestoreSourceClassified,
    RestoreRollbackSnapshot,
    RestoreSwapCommitted,
    RestoreRollbackBegin,
    RestoreRollbackComplete,
    RestoreRollbackFailed,
    PostSwapAnomaly,
    LegacyReplayComplete,

    // Assets
    AssetMoved,
    AssetSkipped,
    AssetReconcileWarning,
    AssetRegistered,

    // Cleanup
    ReaperRungFailed,
    ReaperExhausted,
    RetentionSweepRemoved,
    TempArtifactLeaked,

    // Guard
    GuardRejected,

    // Schedule
    ScheduleNextRun,
    ScheduledBackupFailed,
}

impl Event {
    /// Returns the event name as logged
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::CheckpointBusy => "CHECKPOINT_BUSY",
            Event::CaptureStrategyAttempt => "CAPTURE_STRATEGY_ATTEMPT",
            Event::CaptureStrategyFailed => "CAPTURE_STRATEGY_FAILED",
            Event::SnapshotVerified => "SNAPSHOT_VERIFIED",
            Event::SnapshotRejected => "SNAPSHOT_REJECTED",
            Event::BundleWritten => "BUNDLE_WRITTEN",

            Event::RegistryLoaded => "REGISTRY_LOADED",
            Event::RegistryCorrupt => "REGISTRY_CORRUPT",
            Event::RegistryEntryEvicted => "REGISTRY_ENTRY_EVICTED",
            Event::RegistryEntryRemoved => "REGISTRY_ENTRY_REMOVED",

            Event::RestoreStage => "RESTORE_STAGE",
            Event::RestoreSourceClassified => "RESTORE_SOURCE_CLASSIFIED",
            Event::RestoreRollbackSnapshot => "RESTORE_ROLLBACK_SNAPSHOT",
            Event::RestoreSwapCommitted => "RESTORE_SWAP_COMMITTED",
            Event::RestoreRollbackBegin => "RESTORE_ROLLBACK_BEGIN",
            Event::RestoreRollbackComplete => "RESTORE_ROLLBACK_COMPLETE",
            Event::RestoreRollbackFailed => "RESTORE_ROLLBACK_FAILED",
            Event::PostSwapAnomaly => "POST_SWAP_ANOMALY",
            Event::LegacyReplayComplete => "LEGACY_REPLAY_COMPLETE",

            Event::AssetMoved => "ASSET_MOVED",
            Event::AssetSkipped => "ASSET_SKIPPED",
            Event::AssetReconcileWarning => "ASSET_RECONCILE_WARNING",
            Event::AssetRegistered => "ASSET_REGISTERED",

            Event::ReaperRungFailed => "REAPER_RUNG_FAILED",
            Event::ReaperExhausted => "REAPER_EXHAUSTED",
            Event::RetentionSweepRemoved => "RETENTION_SWEEP_REMOVED",
            Event::TempArtifactLeaked => "TEMP_ARTIFACT_LEAKED",

            Event::GuardRejected => "GUARD_REJECTED",

            Event::ScheduleNextRun => "SCHEDULE_NEXT_RUN",
            Event::ScheduledBackupFailed => "SCHEDULED_BACKUP_FAILED",
        }
    }

    /// Default severity for this event
    pub fn severity(&self) -> Severity {
        match self {
            Event::RestoreRollbackFailed => Severity::Fatal,
            Event::CaptureStrategyFailed
            | Event::SnapshotRejected
            | Event::ReaperExhausted
            | Event::ScheduledBackupFailed
            | Event::RestoreRollbackBegin => Severity::Error,
            Event::CheckpointBusy
            | Event::RegistryCorrupt
            | Event::PostSwapAnomaly
            | Event::AssetReconcileWarning
            | Event::ReaperRungFailed
            | Event::TempArtifactLeaked
            | Event::GuardRejected => Severity::Warn,
            Event::AssetMoved | Event::AssetSkipped | Event::CaptureStrategyAttempt => {
                Severity::Trace
            }
            _ => Severity::Info,
        }
    }

    /// Returns true if this event means live state may be unrecovered
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
