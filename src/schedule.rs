//! Recurring backups
//!
//! A `BackupSchedule` turns a frequency into a cron pattern and computes
//! the next due time. Each due pass runs `BackupEngine::run_scheduled_backup`:
//! a fresh backup into the backup directory, then pruning down to `keep`.
//! A failed pass is logged and the schedule carries on.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use serde::Serialize;

use crate::engine::{BackupEngine, DEFAULT_PRUNE_KEEP};
use crate::errors::{VaultError, VaultResult};
use crate::observability::{log_event_with_fields, Event};
use crate::registry::BackupRecord;

/// How often a scheduled backup runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupFrequency {
    Hourly,
    Daily,
    Weekly,
}

impl BackupFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupFrequency::Hourly => "hourly",
            BackupFrequency::Daily => "daily",
            BackupFrequency::Weekly => "weekly",
        }
    }

    /// Top of the hour, midnight UTC, Sunday midnight UTC
    pub fn cron_pattern(&self) -> &'static str {
        match self {
            BackupFrequency::Hourly => "0 * * * *",
            BackupFrequency::Daily => "0 0 * * *",
            BackupFrequency::Weekly => "0 0 * * 0",
        }
    }
}

impl fmt::Display for BackupFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackupFrequency {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hourly" => Ok(BackupFrequency::Hourly),
            "daily" => Ok(BackupFrequency::Daily),
            "weekly" => Ok(BackupFrequency::Weekly),
            other => Err(VaultError::config(format!(
                "Unknown backup frequency '{}' (expected hourly, daily or weekly)",
                other
            ))),
        }
    }
}

/// Result of one scheduled pass
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledRun {
    pub record: BackupRecord,
    /// Names removed by the prune step
    pub pruned: Vec<String>,
}

/// A validated recurring-backup plan
#[derive(Debug, Clone)]
pub struct BackupSchedule {
    frequency: BackupFrequency,
    keep: usize,
    include_assets: bool,
}

impl BackupSchedule {
    pub fn new(frequency: BackupFrequency) -> VaultResult<Self> {
        parse_pattern(frequency)?;
        Ok(Self {
            frequency,
            keep: DEFAULT_PRUNE_KEEP,
            include_assets: false,
        })
    }

    /// Backups kept after each pass
    pub fn with_keep(mut self, keep: usize) -> Self {
        self.keep = keep;
        self
    }

    /// Bundle the asset tree into each scheduled backup
    pub fn with_assets(mut self, include_assets: bool) -> Self {
        self.include_assets = include_assets;
        self
    }

    pub fn frequency(&self) -> BackupFrequency {
        self.frequency
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    pub fn include_assets(&self) -> bool {
        self.include_assets
    }

    /// First due time strictly after `after`
    pub fn next_run(&self, after: DateTime<Utc>) -> VaultResult<DateTime<Utc>> {
        parse_pattern(self.frequency)?
            .find_next_occurrence(&after, false)
            .map_err(|e| VaultError::config(format!("No next run for {}: {}", self.frequency, e)))
    }

    /// Block and run passes as they fall due
    ///
    /// Stops after `max_runs` passes when given, otherwise runs until the
    /// process exits. Returns the number of passes that succeeded.
    pub fn run(&self, engine: &BackupEngine, max_runs: Option<usize>) -> VaultResult<usize> {
        let mut attempted = 0;
        let mut succeeded = 0;

        while max_runs.map_or(true, |max| attempted < max) {
            let now = Utc::now();
            let due = self.next_run(now)?;
            log_event_with_fields(
                Event::ScheduleNextRun,
                &[
                    ("frequency", self.frequency.as_str()),
                    ("due", &due.to_rfc3339()),
                ],
            );
            std::thread::sleep((due - now).to_std().unwrap_or(Duration::ZERO));

            attempted += 1;
            match engine.run_scheduled_backup(self) {
                Ok(_) => succeeded += 1,
                Err(e) => log_event_with_fields(
                    Event::ScheduledBackupFailed,
                    &[
                        ("frequency", self.frequency.as_str()),
                        ("error", &e.to_string()),
                    ],
                ),
            }
        }
        Ok(succeeded)
    }
}

fn parse_pattern(frequency: BackupFrequency) -> VaultResult<Cron> {
    Cron::new(frequency.cron_pattern())
        .parse()
        .map_err(|e| VaultError::config(format!("Invalid schedule for {}: {}", frequency, e)))
}
