//! dentavault - backup and restore for a clinic SQLite database and its
//! treatment image tree
//!
//! Snapshots are captured through a fallback chain and verified before
//! they are registered. Restores stage a rollback copy first and undo
//! themselves on any failure inside the swap.

pub mod archive;
pub mod assets;
pub mod cli;
pub mod config;
pub mod database;
pub mod engine;
pub mod errors;
pub mod fault_point;
pub mod fsutil;
pub mod guard;
pub mod legacy;
pub mod observability;
pub mod reaper;
pub mod registry;
pub mod restore;
pub mod schedule;
pub mod snapshot;
pub mod verify;

pub use config::EngineConfig;
pub use engine::BackupEngine;
pub use errors::{VaultError, VaultErrorCode, VaultResult};
pub use schedule::{BackupFrequency, BackupSchedule};
