//! Registers image files that exist on disk but have no asset row

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;
use walkdir::WalkDir;

use super::layout::{is_image_file, AssetKey};
use crate::database::{column_names, quote_ident, table_exists};
use crate::errors::VaultResult;
use crate::observability::{log_event_with_fields, Event, Logger, ObservationScope};

/// Per-file failure kept in the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub file: String,
    pub error: String,
}

/// Counts from one synchronisation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub processed: usize,
    pub added: usize,
    pub skipped: usize,
    pub errors: usize,
    pub error_details: Vec<SyncFailure>,
}

impl SyncSummary {
    fn fail(&mut self, file: String, error: String) {
        self.errors += 1;
        log_event_with_fields(
            Event::AssetReconcileWarning,
            &[("file", &file), ("message", &error)],
        );
        self.error_details.push(SyncFailure { file, error });
    }
}

enum Outcome {
    Added,
    Skipped(&'static str),
    Failed(String),
}

/// Walk `root` and insert a row for every unregistered canonical image
///
/// Individual files never fail the pass; they are counted and logged.
pub fn synchronize_assets(conn: &Connection, root: &Path) -> SyncSummary {
    let mut summary = SyncSummary::default();
    let scope = ObservationScope::with_fields(
        "ASSET_SYNC",
        &[("root", root.display().to_string().as_str())],
    );

    if !root.is_dir() {
        scope.complete_with_fields(&[("processed", "0")]);
        return summary;
    }
    match table_exists(conn, "dental_treatment_images") {
        Ok(true) => {}
        Ok(false) => {
            scope.complete_with_fields(&[("processed", "0")]);
            return summary;
        }
        Err(e) => {
            scope.fail(e.message());
            return summary;
        }
    }
    let columns = column_names(conn, "dental_treatment_images").unwrap_or_default();

    let files: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
        .map(|e| e.into_path())
        .collect();

    for file in files {
        summary.processed += 1;
        let relative = match file.strip_prefix(root) {
            Ok(r) => r.to_path_buf(),
            Err(_) => continue,
        };
        let display = relative.display().to_string();

        let key = match AssetKey::parse_relative(&relative) {
            Some(key) => key,
            None => {
                summary.skipped += 1;
                log_event_with_fields(
                    Event::AssetSkipped,
                    &[("file", &display), ("reason", "not in canonical layout")],
                );
                continue;
            }
        };

        match register(conn, &key, &columns) {
            Ok(Outcome::Added) => {
                summary.added += 1;
                log_event_with_fields(
                    Event::AssetRegistered,
                    &[("file", &display), ("image_path", &key.recorded_path())],
                );
            }
            Ok(Outcome::Skipped(reason)) => {
                summary.skipped += 1;
                Logger::trace(
                    Event::AssetSkipped.as_str(),
                    &[("file", &display), ("reason", reason)],
                );
            }
            Ok(Outcome::Failed(error)) => summary.fail(display, error),
            Err(e) => summary.fail(display, e.to_string()),
        }
    }

    scope.complete_with_fields(&[
        ("processed", &summary.processed.to_string()),
        ("added", &summary.added.to_string()),
        ("skipped", &summary.skipped.to_string()),
        ("errors", &summary.errors.to_string()),
    ]);
    summary
}

fn register(conn: &Connection, key: &AssetKey, columns: &[String]) -> VaultResult<Outcome> {
    let patient: Option<Value> = conn
        .query_row(
            "SELECT id FROM patients WHERE CAST(id AS TEXT) = ?1",
            [&key.patient_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(patient) = patient else {
        return Ok(Outcome::Skipped("unknown patient"));
    };

    let recorded = key.recorded_path();
    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM dental_treatment_images WHERE image_path = ?1",
        [&recorded],
        |row| row.get(0),
    )?;
    if existing > 0 {
        return Ok(Outcome::Skipped("already registered"));
    }

    let treatment: Option<Value> = conn
        .query_row(
            "SELECT id FROM dental_treatments
             WHERE patient_id = ?1 AND tooth_number = ?2
             ORDER BY created_at DESC LIMIT 1",
            rusqlite::params![patient, key.tooth_number],
            |row| row.get(0),
        )
        .optional()?;
    let Some(treatment) = treatment else {
        return Ok(Outcome::Failed(format!(
            "No treatment for patient {} tooth {}",
            key.patient_id, key.tooth_number
        )));
    };

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let candidates: Vec<(&str, Value)> = vec![
        ("id", Value::Text(Uuid::new_v4().to_string())),
        ("dental_treatment_id", treatment),
        ("patient_id", patient),
        ("tooth_number", Value::Integer(key.tooth_number)),
        ("image_path", Value::Text(recorded)),
        ("image_type", Value::Text(key.category.clone())),
        ("taken_date", Value::Text(now.clone())),
        ("created_at", Value::Text(now.clone())),
        ("updated_at", Value::Text(now)),
    ];
    let (names, values): (Vec<&str>, Vec<Value>) = candidates
        .into_iter()
        .filter(|(name, _)| columns.iter().any(|c| c == name))
        .unzip();

    let placeholders = (1..=names.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO dental_treatment_images ({}) VALUES ({})",
        names.iter().map(|n| quote_ident(n)).collect::<Vec<_>>().join(", "),
        placeholders
    );
    conn.execute(&sql, params_from_iter(values))?;
    Ok(Outcome::Added)
}
