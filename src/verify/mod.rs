//! Snapshot integrity verification
//!
//! A candidate is opened read-only and checked in a fixed order:
//!
//! 1. At least one table exists (hard failure otherwise)
//! 2. Critical tables are present (missing ones are warnings)
//! 3. `PRAGMA integrity_check` returns `ok` (hard failure otherwise)
//! 4. `PRAGMA foreign_key_check` violations are counted, not fatal
//! 5. Row counts of critical and expected tables are sampled for the log

mod tables;

pub use tables::{CRITICAL_TABLES, EXPECTED_TABLES};

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::Connection;

use crate::database::{count_rows, open_read_only, table_exists, table_names};
use crate::errors::{VaultError, VaultResult};
use crate::observability::{log_event_with_fields, Event, Logger};

/// Outcome of a passing verification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub table_count: usize,
    /// Row counts for every critical or expected table present
    pub row_counts: BTreeMap<String, i64>,
    pub missing_critical: Vec<String>,
    pub foreign_key_violations: usize,
    pub warnings: Vec<String>,
}

/// Read-only structural checks on SQLite files
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Verify a snapshot file
    ///
    /// Any failure to read the file at all is reported as
    /// `VAULT_INTEGRITY_CHECK_FAILED`, like a failed check.
    pub fn verify(path: &Path) -> VaultResult<VerificationReport> {
        let display = path.display().to_string();
        let conn = open_read_only(path).map_err(|e| {
            VaultError::integrity_check_failed(format!("Cannot open {}", display)).with_source(e)
        })?;

        let result = Self::verify_connection(&conn).map_err(|e| {
            if e.code() == crate::errors::VaultErrorCode::IntegrityCheckFailed {
                e
            } else {
                VaultError::integrity_check_failed(format!("Cannot inspect {}", display))
                    .with_source(e)
            }
        });

        match &result {
            Ok(report) => log_event_with_fields(
                Event::SnapshotVerified,
                &[
                    ("path", &display),
                    ("tables", &report.table_count.to_string()),
                    ("warnings", &report.warnings.len().to_string()),
                    ("fk_violations", &report.foreign_key_violations.to_string()),
                ],
            ),
            Err(e) => log_event_with_fields(
                Event::SnapshotRejected,
                &[("path", &display), ("error", &e.to_string())],
            ),
        }
        result
    }

    /// Run every check against an open connection
    pub fn verify_connection(conn: &Connection) -> VaultResult<VerificationReport> {
        let tables = table_names(conn)?;
        if tables.is_empty() {
            return Err(VaultError::integrity_check_failed(
                "Snapshot contains no tables",
            ));
        }

        let mut report = VerificationReport {
            table_count: tables.len(),
            ..Default::default()
        };

        for table in CRITICAL_TABLES {
            if !tables.iter().any(|t| t == table) {
                report.missing_critical.push(table.to_string());
                report
                    .warnings
                    .push(format!("critical table missing: {}", table));
            }
        }

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(VaultError::integrity_check_failed(format!(
                "integrity_check reported: {}",
                integrity
            )));
        }

        let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
        report.foreign_key_violations = stmt.query_map([], |_| Ok(()))?.count();
        if report.foreign_key_violations > 0 {
            report.warnings.push(format!(
                "{} foreign key violations",
                report.foreign_key_violations
            ));
        }

        report.row_counts = sample_row_counts(conn)?;
        Ok(report)
    }

    /// Sanity probe of the live database right after a swap
    ///
    /// Zero tables is an error. Row counts that differ from the verified
    /// candidate are logged as anomalies only.
    pub fn probe_after_swap(
        conn: &Connection,
        expected: &VerificationReport,
    ) -> VaultResult<BTreeMap<String, i64>> {
        let tables = table_names(conn)?;
        if tables.is_empty() {
            return Err(VaultError::integrity_check_failed(
                "Restored database contains no tables",
            ));
        }

        let counts = sample_row_counts(conn)?;
        for table in CRITICAL_TABLES {
            let before = expected.row_counts.get(*table);
            let after = counts.get(*table);
            if before != after {
                log_event_with_fields(
                    Event::PostSwapAnomaly,
                    &[
                        ("table", *table),
                        ("expected", &fmt_count(before)),
                        ("actual", &fmt_count(after)),
                    ],
                );
            }
        }
        Ok(counts)
    }
}

fn sample_row_counts(conn: &Connection) -> VaultResult<BTreeMap<String, i64>> {
    let mut counts = BTreeMap::new();
    for table in CRITICAL_TABLES.iter().chain(EXPECTED_TABLES.iter()) {
        if table_exists(conn, table)? {
            let count = count_rows(conn, table)?;
            Logger::trace(
                "TABLE_ROW_COUNT",
                &[("table", *table), ("rows", &count.to_string())],
            );
            counts.insert(table.to_string(), count);
        }
    }
    Ok(counts)
}

fn fmt_count(count: Option<&i64>) -> String {
    count.map_or_else(|| "missing".to_string(), |c| c.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VaultErrorCode;
    use std::fs;
    use tempfile::TempDir;

    fn make_db(path: &Path, sql: &str) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(sql).unwrap();
    }

    #[test]
    fn test_zero_tables_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.db");
        make_db(&path, "CREATE TABLE t (x); DROP TABLE t;");

        let err = IntegrityVerifier::verify(&path).unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::IntegrityCheckFailed);
    }

    #[test]
    fn test_missing_critical_tables_are_warnings() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("partial.db");
        make_db(
            &path,
            "CREATE TABLE patients (id INTEGER PRIMARY KEY, full_name TEXT);
             INSERT INTO patients (full_name) VALUES ('A'), ('B');",
        );

        let report = IntegrityVerifier::verify(&path).unwrap();
        assert_eq!(report.table_count, 1);
        assert_eq!(report.row_counts.get("patients"), Some(&2));
        assert!(report.missing_critical.contains(&"appointments".to_string()));
        assert_eq!(report.missing_critical.len(), CRITICAL_TABLES.len() - 1);
    }

    #[test]
    fn test_foreign_key_violations_counted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fk.db");
        make_db(
            &path,
            "CREATE TABLE patients (id INTEGER PRIMARY KEY);
             CREATE TABLE appointments (id INTEGER PRIMARY KEY,
                 patient_id INTEGER REFERENCES patients(id));
             INSERT INTO appointments (patient_id) VALUES (42);",
        );

        let report = IntegrityVerifier::verify(&path).unwrap();
        assert_eq!(report.foreign_key_violations, 1);
    }

    #[test]
    fn test_garbage_file_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("garbage.db");
        fs::write(&path, vec![0x42u8; 4096]).unwrap();

        let err = IntegrityVerifier::verify(&path).unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::IntegrityCheckFailed);
    }

    #[test]
    fn test_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        let err = IntegrityVerifier::verify(&temp.path().join("absent.db")).unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::IntegrityCheckFailed);
    }

    #[test]
    fn test_probe_after_swap() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("live.db");
        make_db(
            &path,
            "CREATE TABLE patients (id INTEGER PRIMARY KEY);
             INSERT INTO patients DEFAULT VALUES;",
        );
        let conn = Connection::open(&path).unwrap();

        let mut expected = VerificationReport::default();
        expected.row_counts.insert("patients".to_string(), 5);
        let counts = IntegrityVerifier::probe_after_swap(&conn, &expected).unwrap();
        assert_eq!(counts.get("patients"), Some(&1));
    }

    #[test]
    fn test_probe_after_swap_rejects_empty() {
        let temp = TempDir::new().unwrap();
        let conn = Connection::open(temp.path().join("blank.db")).unwrap();
        assert!(IntegrityVerifier::probe_after_swap(&conn, &VerificationReport::default()).is_err());
    }
}
