//! Live database handle and shared SQLite helpers
//!
//! The engine never holds a raw connection across a swap. It talks to the
//! live database through `LiveDatabase`, whose close/reinitialize pair
//! brackets the window in which the file on disk is replaced.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::errors::{VaultError, VaultResult};
use crate::observability::{log_event_with_fields, Event};

/// Result of a write-ahead log checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// Every committed page is in the main file
    Complete,
    /// A reader or writer blocked the checkpoint; the main file may lag
    Busy,
}

/// Lifecycle of the live database connection
pub trait LiveDatabase {
    /// Path of the live database file
    fn path(&self) -> &Path;

    /// Open connection, or `VAULT_DATABASE` if closed
    fn connection(&self) -> VaultResult<&Connection>;

    /// Flush the write-ahead log into the main file
    fn checkpoint(&self) -> VaultResult<CheckpointOutcome>;

    fn close(&mut self) -> VaultResult<()>;

    /// Reopen the connection on the (possibly replaced) file
    fn reinitialize(&mut self) -> VaultResult<()>;

    fn is_open(&self) -> bool;
}

/// `LiveDatabase` backed by a single rusqlite connection in WAL mode
pub struct SqliteDatabase {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteDatabase {
    /// Open (creating if needed) the live database
    pub fn open(path: impl Into<PathBuf>) -> VaultResult<Self> {
        let path = path.into();
        let conn = Self::connect(&path)?;
        Ok(Self {
            path,
            conn: Some(conn),
        })
    }

    fn connect(path: &Path) -> VaultResult<Connection> {
        let conn = Connection::open(path).map_err(|e| {
            VaultError::database(format!("Failed to open {}", path.display()), e)
        })?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    }
}

impl LiveDatabase for SqliteDatabase {
    fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&self) -> VaultResult<&Connection> {
        self.conn.as_ref().ok_or_else(|| {
            VaultError::database(
                format!("Connection to {} is closed", self.path.display()),
                rusqlite::Error::InvalidQuery,
            )
        })
    }

    fn checkpoint(&self) -> VaultResult<CheckpointOutcome> {
        let conn = self.connection()?;
        for mode in ["TRUNCATE", "FULL"] {
            let busy: i64 = conn.query_row(
                &format!("PRAGMA wal_checkpoint({})", mode),
                [],
                |row| row.get(0),
            )?;
            if busy == 0 {
                return Ok(CheckpointOutcome::Complete);
            }
        }
        log_event_with_fields(
            Event::CheckpointBusy,
            &[("path", &self.path.display().to_string())],
        );
        Ok(CheckpointOutcome::Busy)
    }

    fn close(&mut self) -> VaultResult<()> {
        if let Some(conn) = self.conn.take() {
            if let Err((conn, e)) = conn.close() {
                self.conn = Some(conn);
                return Err(VaultError::database("Failed to close live database", e));
            }
        }
        Ok(())
    }

    fn reinitialize(&mut self) -> VaultResult<()> {
        self.close()?;
        self.conn = Some(Self::connect(&self.path)?);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }
}

/// Open a snapshot for inspection without write access
pub fn open_read_only(path: &Path) -> VaultResult<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| VaultError::database(format!("Failed to open {} read-only", path.display()), e))
}

/// Switch a standalone snapshot to rollback-journal mode so it is one self-contained file
pub fn seal_snapshot(path: &Path) -> VaultResult<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
        .map_err(|e| VaultError::database(format!("Failed to open {}", path.display()), e))?;
    let _mode: String = conn.query_row("PRAGMA journal_mode=DELETE", [], |row| row.get(0))?;
    conn.close()
        .map_err(|(_, e)| VaultError::database("Failed to close snapshot", e))?;
    Ok(())
}

/// Quote an identifier for interpolation into SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// User tables, excluding SQLite internals
pub fn table_names(conn: &Connection) -> VaultResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

pub fn table_exists(conn: &Connection, table: &str) -> VaultResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn count_rows(conn: &Connection, table: &str) -> VaultResult<i64> {
    let count = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Column names of a table, in declaration order
pub fn column_names(conn: &Connection, table: &str) -> VaultResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Remove `-wal` and `-shm` companions of a closed database file
pub fn remove_sidecars(path: &Path) -> VaultResult<()> {
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        match fs::remove_file(&sidecar) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(VaultError::io_error_at_path(&sidecar, e)),
        }
    }
    Ok(())
}
