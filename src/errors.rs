//! Engine error types
//!
//! Every failure that leaves the engine is a single `VaultError`:
//! - Structured error codes in VAULT_CATEGORY_NAME format
//! - Clear severity levels
//! - One descriptive message, granular diagnostics go to the log
//!
//! Only a failed rollback is FATAL. Every other error leaves the live
//! database either untouched or restored to its pre-operation state.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::Path;

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation failed, live state is intact
    Error,
    /// Live state could not be recovered automatically
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Engine error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultErrorCode {
    /// Input file missing, empty or unclassifiable
    SourceUnavailable,
    /// Every capture strategy failed
    SnapshotStrategyFailed,
    /// Structural or consistency failure on a snapshot
    IntegrityCheckFailed,
    /// Restore candidate failed verification before the swap
    RestoreCandidateInvalid,
    /// Failure inside the irreversible window, rolled back
    RestoreSwapFailed,
    /// Rollback after a failed swap did not succeed
    RollbackFailed,
    /// Bundle cannot be read or has an unexpected shape
    ArchiveCorrupt,
    /// Registry document could not be read or written
    Registry,
    /// Named backup is not in the registry
    BackupNotFound,
    /// Another backup or restore holds the operation guard
    OperationInProgress,
    /// A directory tree survived every removal strategy
    DeleteFailed,
    /// Generic I/O failure
    Io,
    /// Generic database failure
    Database,
    /// Engine configuration missing or invalid
    Config,
}

impl VaultErrorCode {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            VaultErrorCode::SourceUnavailable => "VAULT_SOURCE_UNAVAILABLE",
            VaultErrorCode::SnapshotStrategyFailed => "VAULT_SNAPSHOT_STRATEGY_FAILED",
            VaultErrorCode::IntegrityCheckFailed => "VAULT_INTEGRITY_CHECK_FAILED",
            VaultErrorCode::RestoreCandidateInvalid => "VAULT_RESTORE_CANDIDATE_INVALID",
            VaultErrorCode::RestoreSwapFailed => "VAULT_RESTORE_SWAP_FAILED",
            VaultErrorCode::RollbackFailed => "VAULT_ROLLBACK_FAILED",
            VaultErrorCode::ArchiveCorrupt => "VAULT_ARCHIVE_CORRUPT",
            VaultErrorCode::Registry => "VAULT_REGISTRY",
            VaultErrorCode::BackupNotFound => "VAULT_BACKUP_NOT_FOUND",
            VaultErrorCode::OperationInProgress => "VAULT_OPERATION_IN_PROGRESS",
            VaultErrorCode::DeleteFailed => "VAULT_DELETE_FAILED",
            VaultErrorCode::Io => "VAULT_IO",
            VaultErrorCode::Database => "VAULT_DATABASE",
            VaultErrorCode::Config => "VAULT_CONFIG",
        }
    }

    /// Returns the severity level for this error code
    pub fn severity(&self) -> Severity {
        match self {
            VaultErrorCode::RollbackFailed => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for VaultErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

type BoxedSource = Box<dyn StdError + Send + Sync + 'static>;

/// Engine error with full context
#[derive(Debug)]
pub struct VaultError {
    code: VaultErrorCode,
    message: String,
    source: Option<BoxedSource>,
}

impl VaultError {
    fn new(code: VaultErrorCode, message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self {
            code,
            message: message.into(),
            source,
        }
    }

    /// Attach an underlying cause
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::new(VaultErrorCode::SourceUnavailable, message, None)
    }

    /// All capture strategies exhausted; `last` is the final underlying failure
    pub fn snapshot_strategy_failed(message: impl Into<String>, last: Option<VaultError>) -> Self {
        Self::new(
            VaultErrorCode::SnapshotStrategyFailed,
            message,
            last.map(|e| Box::new(e) as BoxedSource),
        )
    }

    pub fn integrity_check_failed(message: impl Into<String>) -> Self {
        Self::new(VaultErrorCode::IntegrityCheckFailed, message, None)
    }

    /// Candidate rejected before the live file was touched
    pub fn restore_candidate_invalid(message: impl Into<String>, cause: VaultError) -> Self {
        Self::new(
            VaultErrorCode::RestoreCandidateInvalid,
            message,
            Some(Box::new(cause)),
        )
    }

    /// Failure inside the swap window after a successful rollback
    pub fn restore_swap_failed(message: impl Into<String>, cause: VaultError) -> Self {
        Self::new(VaultErrorCode::RestoreSwapFailed, message, Some(Box::new(cause)))
    }

    pub fn rollback_failed(message: impl Into<String>, cause: VaultError) -> Self {
        Self::new(VaultErrorCode::RollbackFailed, message, Some(Box::new(cause)))
    }

    pub fn archive_corrupt(message: impl Into<String>) -> Self {
        Self::new(VaultErrorCode::ArchiveCorrupt, message, None)
    }

    pub fn registry(message: impl Into<String>) -> Self {
        Self::new(VaultErrorCode::Registry, message, None)
    }

    pub fn backup_not_found(name: &str) -> Self {
        Self::new(
            VaultErrorCode::BackupNotFound,
            format!("Backup not found in registry: {}", name),
            None,
        )
    }

    pub fn operation_in_progress(current: impl fmt::Display) -> Self {
        Self::new(
            VaultErrorCode::OperationInProgress,
            format!("Another operation is in progress: {}", current),
            None,
        )
    }

    pub fn delete_failed(path: &Path, cause: VaultError) -> Self {
        Self::new(
            VaultErrorCode::DeleteFailed,
            format!("Failed to remove {}", path.display()),
            Some(Box::new(cause)),
        )
    }

    /// Creates an I/O error
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(VaultErrorCode::Io, message, Some(Box::new(source)))
    }

    /// Creates an I/O error at a specific path
    pub fn io_error_at_path(path: &Path, source: io::Error) -> Self {
        Self::io_error(format!("I/O error at {}", path.display()), source)
    }

    /// Creates a database error
    pub fn database(message: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::new(VaultErrorCode::Database, message, Some(Box::new(source)))
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(VaultErrorCode::Config, message, None)
    }

    /// Returns the error code
    pub fn code(&self) -> VaultErrorCode {
        self.code
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the severity of this error
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns whether live state may be left unrecovered
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code,
            self.message
        )?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl StdError for VaultError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

/// Result type for engine operations
pub type VaultResult<T> = Result<T, VaultError>;

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        VaultError::database("Database operation failed", err)
    }
}

impl From<zip::result::ZipError> for VaultError {
    fn from(err: zip::result::ZipError) -> Self {
        VaultError::archive_corrupt("Bundle could not be processed").with_source(err)
    }
}
