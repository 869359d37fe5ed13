//! Replay of the legacy row-by-row JSON export
//!
//! The export predates file-level snapshots. It carries `metadata`,
//! `patients` and `appointments` (required) plus optional `payments`,
//! `treatments` and `settings`. Each present section clears its table and
//! re-inserts the serialized rows inside a single transaction.
//!
//! This path does not go through `IntegrityVerifier`; it mutates live rows
//! directly and relies on the transaction for atomicity.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use crate::database::{column_names, quote_ident, table_exists};
use crate::errors::{VaultError, VaultResult};
use crate::observability::{log_event_with_fields, Event, Logger};

type JsonRow = Map<String, JsonValue>;

/// Parsed legacy export
#[derive(Debug, Deserialize)]
pub struct LegacyExport {
    pub metadata: JsonValue,
    pub patients: Vec<JsonRow>,
    pub appointments: Vec<JsonRow>,
    #[serde(default)]
    pub payments: Option<Vec<JsonRow>>,
    #[serde(default)]
    pub treatments: Option<Vec<JsonRow>>,
    #[serde(default)]
    pub settings: Option<JsonValue>,
}

impl LegacyExport {
    /// Read and validate an export document
    pub fn load(path: &Path) -> VaultResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| VaultError::io_error_at_path(path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> VaultResult<Self> {
        let doc: JsonValue = serde_json::from_str(content).map_err(|e| {
            VaultError::restore_candidate_invalid(
                "Legacy export is not valid JSON",
                VaultError::integrity_check_failed(e.to_string()),
            )
        })?;

        for section in ["metadata", "patients", "appointments"] {
            if doc.get(section).map_or(true, JsonValue::is_null) {
                return Err(VaultError::restore_candidate_invalid(
                    "Legacy export is incomplete",
                    VaultError::integrity_check_failed(format!("missing section: {}", section)),
                ));
            }
        }

        serde_json::from_value(doc).map_err(|e| {
            VaultError::restore_candidate_invalid(
                "Legacy export has an unexpected shape",
                VaultError::integrity_check_failed(e.to_string()),
            )
        })
    }

    /// Sections in replay order
    fn sections(&self) -> Vec<(&'static str, Vec<JsonRow>)> {
        let mut out = vec![
            ("patients", self.patients.clone()),
            ("appointments", self.appointments.clone()),
        ];
        if let Some(rows) = &self.payments {
            out.push(("payments", rows.clone()));
        }
        if let Some(rows) = &self.treatments {
            out.push(("treatments", rows.clone()));
        }
        match &self.settings {
            Some(JsonValue::Object(row)) => out.push(("settings", vec![row.clone()])),
            Some(JsonValue::Array(rows)) => out.push((
                "settings",
                rows.iter().filter_map(|r| r.as_object().cloned()).collect(),
            )),
            _ => {}
        }
        out
    }
}

/// Rows inserted per table
pub type LegacyReplaySummary = BTreeMap<String, usize>;

/// Clear and re-insert every section of `export` on `conn`
///
/// Foreign key enforcement is suspended for the replay and restored
/// afterwards, whatever the outcome.
pub fn replay(conn: &Connection, export: &LegacyExport) -> VaultResult<LegacyReplaySummary> {
    if let Some(created) = export.metadata.get("created_at").and_then(JsonValue::as_str) {
        Logger::info("LEGACY_EXPORT_METADATA", &[("created_at", created)]);
    }

    conn.execute_batch("PRAGMA foreign_keys = OFF")?;
    let result = replay_sections(conn, export);
    let restored = conn.execute_batch("PRAGMA foreign_keys = ON");

    let summary = result?;
    restored?;

    let total: usize = summary.values().sum();
    log_event_with_fields(
        Event::LegacyReplayComplete,
        &[
            ("tables", &summary.len().to_string()),
            ("rows", &total.to_string()),
        ],
    );
    Ok(summary)
}

fn replay_sections(conn: &Connection, export: &LegacyExport) -> VaultResult<LegacyReplaySummary> {
    let tx = conn.unchecked_transaction()?;
    let mut summary = LegacyReplaySummary::new();

    for (table, rows) in export.sections() {
        if !table_exists(&tx, table)? {
            Logger::warn("LEGACY_TABLE_MISSING", &[("table", table)]);
            continue;
        }
        let columns = column_names(&tx, table)?;
        tx.execute(&format!("DELETE FROM {}", quote_ident(table)), [])?;

        let mut inserted = 0;
        for row in &rows {
            if insert_row(&tx, table, &columns, row)? {
                inserted += 1;
            }
        }
        summary.insert(table.to_string(), inserted);
    }

    tx.commit()?;
    Ok(summary)
}

/// Insert the fields of `row` that name real columns; false if none do
fn insert_row(conn: &Connection, table: &str, columns: &[String], row: &JsonRow) -> VaultResult<bool> {
    let (names, values): (Vec<&str>, Vec<Value>) = row
        .iter()
        .filter(|(key, _)| columns.iter().any(|c| c == *key))
        .map(|(key, value)| (key.as_str(), json_to_sql(value)))
        .unzip();
    if names.is_empty() {
        return Ok(false);
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.iter().map(|n| quote_ident(n)).collect::<Vec<_>>().join(", "),
        (1..=names.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
    );
    conn.execute(&sql, params_from_iter(values))?;
    Ok(true)
}

fn json_to_sql(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Integer(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => Value::Text(s.clone()),
        nested => Value::Text(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::count_rows;
    use crate::errors::VaultErrorCode;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE patients (id INTEGER PRIMARY KEY, full_name TEXT, active INTEGER);
             CREATE TABLE appointments (id INTEGER PRIMARY KEY,
                 patient_id INTEGER REFERENCES patients(id), title TEXT);
             CREATE TABLE settings (id INTEGER PRIMARY KEY, clinic_name TEXT);
             INSERT INTO patients VALUES (99, 'Old', 1);
             INSERT INTO appointments VALUES (7, 99, 'old visit');",
        )
        .unwrap();
        conn
    }

    const DOC: &str = r#"{
        "metadata": {"created_at": "2022-03-01T10:00:00Z", "version": "1.0"},
        "patients": [
            {"id": 1, "full_name": "Sara", "active": true, "legacy_only": "x"},
            {"id": 2, "full_name": "Adam", "active": false}
        ],
        "appointments": [{"id": 10, "patient_id": 1, "title": "checkup"}],
        "payments": [{"id": 1, "amount": 50}],
        "settings": {"id": 1, "clinic_name": "Smile"}
    }"#;

    #[test]
    fn test_replay_replaces_sections() {
        let conn = setup();
        let export = LegacyExport::parse(DOC).unwrap();
        let summary = replay(&conn, &export).unwrap();

        assert_eq!(summary.get("patients"), Some(&2));
        assert_eq!(summary.get("appointments"), Some(&1));
        assert_eq!(summary.get("settings"), Some(&1));
        assert!(!summary.contains_key("payments"));

        assert_eq!(count_rows(&conn, "patients").unwrap(), 2);
        let active: i64 = conn
            .query_row("SELECT active FROM patients WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(active, 1);
        let fk: bool = conn
            .query_row("PRAGMA foreign_keys", [], |r| r.get(0))
            .unwrap();
        assert!(fk);
    }

    #[test]
    fn test_missing_section_rejected() {
        let err = LegacyExport::parse(r#"{"metadata": {}, "patients": []}"#).unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::RestoreCandidateInvalid);
        assert!(err.to_string().contains("appointments"));
    }

    #[test]
    fn test_invalid_json_rejected() {
        let err = LegacyExport::parse("not json").unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::RestoreCandidateInvalid);
    }

    #[test]
    fn test_failed_insert_rolls_back() {
        let conn = setup();
        let doc = r#"{
            "metadata": {},
            "patients": [{"id": 1, "full_name": "A"}, {"id": 1, "full_name": "B"}],
            "appointments": []
        }"#;
        let export = LegacyExport::parse(doc).unwrap();
        assert!(replay(&conn, &export).is_err());

        let name: String = conn
            .query_row("SELECT full_name FROM patients WHERE id = 99", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "Old");
    }
}
