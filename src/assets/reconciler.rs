//! Post-restore repair of asset rows
//!
//! For each row of `dental_treatment_images`:
//!
//! 1. File already at its canonical path: record that path
//! 2. Else found under the legacy by-name layout: move it to the canonical path
//! 3. Else exactly one unclaimed file of that name anywhere in the tree: move it
//! 4. Else leave the row alone and warn
//!
//! Independently, the row's treatment is re-pointed at the newest
//! treatment for the same (patient, tooth).
//!
//! Files are moved, never copied, so a relocation never leaves a
//! duplicate behind. A file already sitting at some row's canonical path
//! is claimed and never a search candidate. Rows whose keys are not plain
//! path segments are skipped. Problems with individual rows are logged
//! and counted; reconciliation itself does not fail.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use walkdir::WalkDir;

use super::layout::{key_segment, AssetKey};
use crate::database::table_exists;
use crate::errors::VaultResult;
use crate::fsutil::move_file;
use crate::observability::{log_event_with_fields, Event, ObservationScope};

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub examined: usize,
    pub already_canonical: usize,
    pub paths_updated: usize,
    pub relocated_from_legacy: usize,
    pub relocated_by_search: usize,
    pub relinked_treatments: usize,
    /// Rows logged as `ASSET_RECONCILE_WARNING`
    pub warnings: usize,
}

struct AssetRow {
    id: Value,
    treatment_id: Value,
    patient_id: Value,
    tooth_number: i64,
    image_path: String,
    image_type: Option<String>,
}

/// Repairs asset-file to row linkage
pub struct ImageReconciler<'a> {
    conn: &'a Connection,
    root: PathBuf,
    by_name: Option<HashMap<OsString, Vec<PathBuf>>>,
    /// Files at some row's canonical path
    claimed: HashSet<PathBuf>,
    summary: ReconcileSummary,
}

impl<'a> ImageReconciler<'a> {
    pub fn new(conn: &'a Connection, root: impl Into<PathBuf>) -> Self {
        Self {
            conn,
            root: root.into(),
            by_name: None,
            claimed: HashSet::new(),
            summary: ReconcileSummary::default(),
        }
    }

    /// Run one pass over every asset row
    pub fn reconcile(mut self) -> ReconcileSummary {
        let scope = ObservationScope::with_fields(
            "ASSET_RECONCILE",
            &[("root", &self.root.display().to_string())],
        );

        match self.run() {
            Ok(()) => {
                let s = &self.summary;
                scope.complete_with_fields(&[
                    ("examined", &s.examined.to_string()),
                    ("paths_updated", &s.paths_updated.to_string()),
                    ("relinked", &s.relinked_treatments.to_string()),
                    ("warnings", &s.warnings.to_string()),
                ]);
            }
            Err(e) => {
                self.warn("-", &format!("reconciliation aborted: {}", e));
                scope.fail(e.message());
            }
        }
        self.summary
    }

    fn run(&mut self) -> VaultResult<()> {
        if !table_exists(self.conn, "dental_treatment_images")? {
            return Ok(());
        }
        let relink = table_exists(self.conn, "dental_treatments")?;

        let rows = self.load_rows()?;
        self.claimed = rows
            .iter()
            .filter_map(|row| asset_key(row).ok())
            .map(|key| key.canonical_path(&self.root))
            .filter(|path| path.is_file())
            .collect();

        for row in rows {
            self.summary.examined += 1;
            let row_label = key_segment(&row.id).unwrap_or_else(|| "?".to_string());

            let new_path = self.repair_path(&row, &row_label);
            let new_treatment = if relink {
                self.latest_treatment(&row, &row_label)
            } else {
                None
            };

            let path_changed = new_path.as_deref().map_or(false, |p| p != row.image_path);
            let treatment_changed = new_treatment
                .as_ref()
                .map_or(false, |t| *t != row.treatment_id);
            if !path_changed && !treatment_changed {
                continue;
            }

            let path = new_path.unwrap_or_else(|| row.image_path.clone());
            let treatment = new_treatment.unwrap_or_else(|| row.treatment_id.clone());
            let updated = self.conn.execute(
                "UPDATE dental_treatment_images SET image_path = ?1, dental_treatment_id = ?2 WHERE id = ?3",
                params![path, treatment, row.id],
            );
            match updated {
                Ok(_) => {
                    if path_changed {
                        self.summary.paths_updated += 1;
                    }
                    if treatment_changed {
                        self.summary.relinked_treatments += 1;
                    }
                }
                Err(e) => self.warn(&row_label, &format!("update failed: {}", e)),
            }
        }
        Ok(())
    }

    fn load_rows(&self) -> VaultResult<Vec<AssetRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, dental_treatment_id, patient_id, tooth_number, image_path, image_type
             FROM dental_treatment_images",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AssetRow {
                    id: row.get(0)?,
                    treatment_id: row.get(1)?,
                    patient_id: row.get(2)?,
                    tooth_number: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    image_path: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    image_type: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Recorded path the row should carry, or `None` to leave it
    fn repair_path(&mut self, row: &AssetRow, label: &str) -> Option<String> {
        let key = match asset_key(row) {
            Ok(key) => key,
            Err(reason) => {
                self.warn(label, reason);
                return None;
            }
        };
        let canonical = key.canonical_path(&self.root);
        if canonical.is_file() {
            self.summary.already_canonical += 1;
            return Some(key.recorded_path());
        }

        let full_name = self.patient_name(&row.patient_id);
        let legacy = key.legacy_path(&self.root, full_name.as_deref());
        if legacy.is_file() {
            if self.relocate(&legacy, &canonical, label) {
                self.summary.relocated_from_legacy += 1;
                return Some(key.recorded_path());
            }
            return None;
        }

        let matches = self.find_by_name(&key.filename);
        match matches.as_slice() {
            [only] => {
                let only = only.clone();
                if self.relocate(&only, &canonical, label) {
                    self.summary.relocated_by_search += 1;
                    return Some(key.recorded_path());
                }
                None
            }
            [] => {
                self.warn(label, &format!("file not found: {}", key.filename));
                None
            }
            many => {
                self.warn(
                    label,
                    &format!("{} candidates for {}, leaving path", many.len(), key.filename),
                );
                None
            }
        }
    }

    fn relocate(&mut self, from: &Path, to: &Path, label: &str) -> bool {
        match move_file(from, to) {
            Ok(()) => {
                log_event_with_fields(
                    Event::AssetMoved,
                    &[
                        ("row", label),
                        ("from", &from.display().to_string()),
                        ("to", &to.display().to_string()),
                    ],
                );
                self.claimed.insert(to.to_path_buf());
                if let Some(index) = self.by_name.as_mut() {
                    if let Some(name) = from.file_name() {
                        if let Some(paths) = index.get_mut(name) {
                            paths.retain(|p| p != from);
                            paths.push(to.to_path_buf());
                        }
                    }
                }
                true
            }
            Err(e) => {
                self.warn(label, &format!("move failed: {}", e));
                false
            }
        }
    }

    fn find_by_name(&mut self, filename: &str) -> Vec<PathBuf> {
        let root = self.root.clone();
        let index = self.by_name.get_or_insert_with(|| {
            let mut index: HashMap<OsString, Vec<PathBuf>> = HashMap::new();
            for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
                if entry.file_type().is_file() {
                    index
                        .entry(entry.file_name().to_os_string())
                        .or_default()
                        .push(entry.into_path());
                }
            }
            index
        });
        index
            .get(&OsString::from(filename))
            .map(|paths| {
                paths
                    .iter()
                    .filter(|p| !self.claimed.contains(*p))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn patient_name(&self, patient_id: &Value) -> Option<String> {
        self.conn
            .query_row(
                "SELECT full_name FROM patients WHERE id = ?1",
                [patient_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .ok()
            .flatten()
            .flatten()
    }

    fn latest_treatment(&mut self, row: &AssetRow, label: &str) -> Option<Value> {
        let found = self
            .conn
            .query_row(
                "SELECT id FROM dental_treatments
                 WHERE patient_id = ?1 AND tooth_number = ?2
                 ORDER BY created_at DESC LIMIT 1",
                params![row.patient_id, row.tooth_number],
                |r| r.get::<_, Value>(0),
            )
            .optional();
        match found {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                self.warn(
                    label,
                    &format!("no treatment for tooth {}", row.tooth_number),
                );
                None
            }
            Err(e) => {
                self.warn(label, &format!("treatment lookup failed: {}", e));
                None
            }
        }
    }

    fn warn(&mut self, label: &str, message: &str) {
        self.summary.warnings += 1;
        log_event_with_fields(
            Event::AssetReconcileWarning,
            &[("row", label), ("message", message)],
        );
    }
}

/// Location keys of a row, or why it has none
fn asset_key(row: &AssetRow) -> Result<AssetKey, &'static str> {
    let filename = match Path::new(&row.image_path).file_name().and_then(|f| f.to_str()) {
        Some(f) if !row.image_path.ends_with('/') => f.to_string(),
        _ => return Err("image_path has no file name"),
    };
    let patient = key_segment(&row.patient_id).ok_or("row has no patient id")?;

    let key = AssetKey::new(patient, row.tooth_number, row.image_type.as_deref(), filename);
    if !key.is_contained() {
        return Err("key segment is not a plain path component");
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SCHEMA: &str = "
        CREATE TABLE patients (id TEXT PRIMARY KEY, full_name TEXT);
        CREATE TABLE dental_treatments (id TEXT PRIMARY KEY, patient_id TEXT,
            tooth_number INTEGER, created_at TEXT);
        CREATE TABLE dental_treatment_images (id TEXT PRIMARY KEY, dental_treatment_id TEXT,
            patient_id TEXT, tooth_number INTEGER, image_path TEXT, image_type TEXT);
        INSERT INTO patients VALUES ('p1', 'Lina Haddad');
        INSERT INTO dental_treatments VALUES ('t-old', 'p1', 14, '2023-01-01T00:00:00Z');
        INSERT INTO dental_treatments VALUES ('t-new', 'p1', 14, '2024-06-01T00:00:00Z');
    ";

    fn setup(temp: &TempDir, image_path: &str) -> Connection {
        let conn = Connection::open(temp.path().join("db.sqlite")).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO dental_treatment_images VALUES ('i1', 't-new', 'p1', 14, ?1, 'xray')",
            [image_path],
        )
        .unwrap();
        conn
    }

    fn image_path(conn: &Connection) -> String {
        conn.query_row(
            "SELECT image_path FROM dental_treatment_images WHERE id = 'i1'",
            [],
            |r| r.get(0),
        )
        .unwrap()
    }

    fn count_files(root: &Path, name: &str) -> usize {
        WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && e.file_name() == name)
            .count()
    }

    #[test]
    fn test_canonical_file_left_in_place() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("dental_images");
        fs::create_dir_all(root.join("p1/14/xray")).unwrap();
        fs::write(root.join("p1/14/xray/scan.png"), b"png").unwrap();
        let conn = setup(&temp, "dental_images/p1/14/xray/scan.png");

        let summary = ImageReconciler::new(&conn, &root).reconcile();
        assert_eq!(summary.already_canonical, 1);
        assert_eq!(summary.paths_updated, 0);
        assert_eq!(summary.warnings, 0);
    }

    #[test]
    fn test_legacy_file_relocated_without_duplicate() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("dental_images");
        fs::create_dir_all(root.join("Lina_Haddad/xray")).unwrap();
        fs::write(root.join("Lina_Haddad/xray/scan.png"), b"png").unwrap();
        let conn = setup(&temp, "dental_images/Lina_Haddad/xray/scan.png");

        let summary = ImageReconciler::new(&conn, &root).reconcile();

        assert_eq!(summary.relocated_from_legacy, 1);
        assert_eq!(summary.paths_updated, 1);
        assert_eq!(image_path(&conn), "dental_images/p1/14/xray/scan.png");
        assert!(root.join("p1/14/xray/scan.png").is_file());
        assert_eq!(count_files(&root, "scan.png"), 1);
    }

    #[test]
    fn test_unique_search_match_relocated() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("dental_images");
        fs::create_dir_all(root.join("misc/deep")).unwrap();
        fs::write(root.join("misc/deep/scan.png"), b"png").unwrap();
        let conn = setup(&temp, "C:/old/install/scan.png");

        let summary = ImageReconciler::new(&conn, &root).reconcile();
        assert_eq!(summary.relocated_by_search, 1);
        assert_eq!(image_path(&conn), "dental_images/p1/14/xray/scan.png");
        assert_eq!(count_files(&root, "scan.png"), 1);
    }

    #[test]
    fn test_ambiguous_match_left_alone() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("dental_images");
        for dir in ["a", "b"] {
            fs::create_dir_all(root.join(dir)).unwrap();
            fs::write(root.join(dir).join("scan.png"), b"png").unwrap();
        }
        let conn = setup(&temp, "elsewhere/scan.png");

        let summary = ImageReconciler::new(&conn, &root).reconcile();
        assert_eq!(summary.warnings, 1);
        assert_eq!(image_path(&conn), "elsewhere/scan.png");
        assert_eq!(count_files(&root, "scan.png"), 2);
    }

    #[test]
    fn test_search_skips_file_owned_by_another_row() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("dental_images");
        fs::create_dir_all(root.join("p2/3/before")).unwrap();
        fs::write(root.join("p2/3/before/1.jpg"), b"jpg").unwrap();
        let conn = setup(&temp, "dental_images/p1/14/xray/1.jpg");
        conn.execute_batch(
            "INSERT INTO patients VALUES ('p2', 'Omar Said');
             INSERT INTO dental_treatments VALUES ('t-p2', 'p2', 3, '2024-01-01T00:00:00Z');
             INSERT INTO dental_treatment_images
                 VALUES ('i2', 't-p2', 'p2', 3, 'dental_images/p2/3/before/1.jpg', 'before');",
        )
        .unwrap();

        let summary = ImageReconciler::new(&conn, &root).reconcile();

        assert!(root.join("p2/3/before/1.jpg").is_file());
        assert!(!root.join("p1/14/xray/1.jpg").exists());
        assert_eq!(summary.relocated_by_search, 0);
        assert_eq!(summary.already_canonical, 1);
        assert_eq!(summary.warnings, 1);
        assert_eq!(image_path(&conn), "dental_images/p1/14/xray/1.jpg");
    }

    #[test]
    fn test_traversal_key_is_skipped() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("imgs").join("dental_images");
        fs::create_dir_all(root.join("misc")).unwrap();
        fs::write(root.join("misc/scan.png"), b"png").unwrap();
        let conn = setup(&temp, "elsewhere/scan.png");
        conn.execute(
            "UPDATE dental_treatment_images SET image_type = '../../../../escaped'",
            [],
        )
        .unwrap();

        let summary = ImageReconciler::new(&conn, &root).reconcile();

        assert_eq!(summary.warnings, 1);
        assert_eq!(summary.paths_updated, 0);
        assert!(root.join("misc/scan.png").is_file());
        assert_eq!(count_files(temp.path(), "scan.png"), 1);
        assert_eq!(image_path(&conn), "elsewhere/scan.png");
    }

    #[test]
    fn test_missing_file_warns() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("dental_images");
        let conn = setup(&temp, "dental_images/p1/14/xray/gone.png");

        let summary = ImageReconciler::new(&conn, &root).reconcile();
        assert_eq!(summary.warnings, 1);
        assert_eq!(image_path(&conn), "dental_images/p1/14/xray/gone.png");
    }

    #[test]
    fn test_treatment_relinked_to_newest() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("dental_images");
        fs::create_dir_all(root.join("p1/14/xray")).unwrap();
        fs::write(root.join("p1/14/xray/scan.png"), b"png").unwrap();
        let conn = setup(&temp, "dental_images/p1/14/xray/scan.png");
        conn.execute(
            "UPDATE dental_treatment_images SET dental_treatment_id = 't-old'",
            [],
        )
        .unwrap();

        let summary = ImageReconciler::new(&conn, &root).reconcile();
        assert_eq!(summary.relinked_treatments, 1);
        let treatment: String = conn
            .query_row("SELECT dental_treatment_id FROM dental_treatment_images", [], |r| r.get(0))
            .unwrap();
        assert_eq!(treatment, "t-new");
    }

    #[test]
    fn test_no_asset_table_is_noop() {
        let temp = TempDir::new().unwrap();
        let conn = Connection::open_in_memory().unwrap();
        let summary = ImageReconciler::new(&conn, temp.path()).reconcile();
        assert_eq!(summary, ReconcileSummary::default());
    }
}
