//! Database snapshot capture
//!
//! A snapshot is a standalone SQLite file holding a consistent
//! point-in-time copy of the live database. Capture tries an ordered
//! chain of strategies and only ever leaves a verified file behind.

mod creator;
mod strategies;

pub use creator::{BackupCreator, CapturedSnapshot};
pub use strategies::{CaptureStrategy, OnlineBackup, RawCopy, VacuumInto};
