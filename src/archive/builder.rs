//! Bundle assembly
//!
//! The bundle gets its own snapshot through the capture chain; the live
//! file is never read directly. Entries are streamed one file at a time
//! so the asset tree is never held in memory. The archive is written to
//! `<destination>.partial` and renamed into place only once complete.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{ASSETS_ENTRY, DB_ENTRY};
use crate::database::LiveDatabase;
use crate::errors::{VaultError, VaultResult};
use crate::fault_point::{self, points};
use crate::fsutil::{fsync_dir, sibling};
use crate::observability::{log_event_with_fields, Event};
use crate::reaper::{ReliableDelete, TempArtifact};
use crate::snapshot::BackupCreator;
use crate::verify::VerificationReport;

/// Result of a written bundle
#[derive(Debug, Clone)]
pub struct BundleSummary {
    pub path: PathBuf,
    pub size: u64,
    pub asset_files: usize,
    pub snapshot: VerificationReport,
}

/// Writes database + asset bundles
pub struct ArchiveBuilder<'a> {
    creator: &'a BackupCreator,
    reaper: &'a dyn ReliableDelete,
}

fn zip_write_error(path: &Path, err: ZipError) -> VaultError {
    match err {
        ZipError::Io(e) => VaultError::io_error_at_path(path, e),
        other => VaultError::io_error_at_path(path, io::Error::new(io::ErrorKind::Other, other)),
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new(creator: &'a BackupCreator, reaper: &'a dyn ReliableDelete) -> Self {
        Self { creator, reaper }
    }

    /// Snapshot `db`, then bundle it with `assets_root` at `destination`
    ///
    /// The temporary snapshot in `work_dir` is removed whether or not the
    /// bundle is written.
    pub fn create_bundled_backup(
        &self,
        db: &dyn LiveDatabase,
        assets_root: &Path,
        work_dir: &Path,
        destination: &Path,
    ) -> VaultResult<BundleSummary> {
        fs::create_dir_all(work_dir).map_err(|e| VaultError::io_error_at_path(work_dir, e))?;
        let temp_snapshot = TempArtifact::new(
            work_dir.join(format!("temp_backup_{}.db", now_millis())),
            self.reaper,
        );
        let snapshot = self.creator.capture(db, temp_snapshot.path(), self.reaper)?;

        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| VaultError::io_error_at_path(parent, e))?;
            }
        }

        let partial = TempArtifact::new(sibling(destination, ".partial"), self.reaper);
        let asset_files = write_bundle(partial.path(), &snapshot.path, assets_root)?;

        fs::rename(partial.path(), destination)
            .map_err(|e| VaultError::io_error_at_path(destination, e))?;
        if let Some(parent) = destination.parent() {
            fsync_dir(parent)?;
        }

        let size = fs::metadata(destination)
            .map_err(|e| VaultError::io_error_at_path(destination, e))?
            .len();

        log_event_with_fields(
            Event::BundleWritten,
            &[
                ("path", &destination.display().to_string()),
                ("size", &size.to_string()),
                ("asset_files", &asset_files.to_string()),
            ],
        );

        Ok(BundleSummary {
            path: destination.to_path_buf(),
            size,
            asset_files,
            snapshot: snapshot.report,
        })
    }
}

/// Stream the snapshot and the asset tree into a new zip at `path`
///
/// Returns the number of asset files written.
fn write_bundle(path: &Path, snapshot: &Path, assets_root: &Path) -> VaultResult<usize> {
    let file = File::create(path).map_err(|e| VaultError::io_error_at_path(path, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let dir_options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    zip.start_file(DB_ENTRY, options)
        .map_err(|e| zip_write_error(path, e))?;
    let mut db_file = File::open(snapshot).map_err(|e| VaultError::io_error_at_path(snapshot, e))?;
    io::copy(&mut db_file, &mut zip).map_err(|e| VaultError::io_error_at_path(path, e))?;

    zip.add_directory(format!("{}/", ASSETS_ENTRY), dir_options)
        .map_err(|e| zip_write_error(path, e))?;

    let mut asset_files = 0;
    if assets_root.is_dir() {
        for entry in WalkDir::new(assets_root)
            .min_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                VaultError::io_error_at_path(
                    assets_root,
                    e.into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk loop")),
                )
            })?;
            let relative = match entry.path().strip_prefix(assets_root) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            let name = entry_name(relative);

            if entry.file_type().is_dir() {
                zip.add_directory(format!("{}/{}/", ASSETS_ENTRY, name), dir_options)
                    .map_err(|e| zip_write_error(path, e))?;
            } else if entry.file_type().is_file() {
                zip.start_file(format!("{}/{}", ASSETS_ENTRY, name), options)
                    .map_err(|e| zip_write_error(path, e))?;
                let mut source =
                    File::open(entry.path()).map_err(|e| VaultError::io_error_at_path(entry.path(), e))?;
                io::copy(&mut source, &mut zip).map_err(|e| VaultError::io_error_at_path(path, e))?;
                asset_files += 1;
            }
        }
    }

    fault_point::check(points::BUNDLE_BEFORE_FINISH)
        .map_err(|e| VaultError::io_error_at_path(path, e))?;

    let writer = zip.finish().map_err(|e| zip_write_error(path, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| VaultError::io_error_at_path(path, e.into_error()))?;
    file.sync_all()
        .map_err(|e| VaultError::io_error_at_path(path, e))?;

    Ok(asset_files)
}

/// Forward-slash entry name for a relative path
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use crate::reaper::DirectoryReaper;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn live(temp: &TempDir) -> SqliteDatabase {
        let db = SqliteDatabase::open(temp.path().join("live.db")).unwrap();
        db.connection()
            .unwrap()
            .execute_batch(
                "CREATE TABLE patients (id INTEGER PRIMARY KEY, full_name TEXT);
                 INSERT INTO patients (full_name) VALUES ('A');",
            )
            .unwrap();
        db
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_bundle_with_assets() {
        let temp = TempDir::new().unwrap();
        let db = live(&temp);
        let assets = temp.path().join("dental_images");
        fs::create_dir_all(assets.join("1/11/xray")).unwrap();
        fs::write(assets.join("1/11/xray/scan.png"), b"png").unwrap();

        let creator = BackupCreator::new();
        let reaper = DirectoryReaper::new();
        let dest = temp.path().join("backups/bundle.zip");
        let summary = ArchiveBuilder::new(&creator, &reaper)
            .create_bundled_backup(&db, &assets, temp.path(), &dest)
            .unwrap();

        assert_eq!(summary.asset_files, 1);
        assert!(summary.size > 0);
        let names = entry_names(&dest);
        assert!(names.contains(&DB_ENTRY.to_string()));
        assert!(names.contains(&"dental_images/".to_string()));
        assert!(names.contains(&"dental_images/1/11/xray/scan.png".to_string()));
        assert!(!sibling(&dest, ".partial").exists());
    }

    #[test]
    fn test_missing_tree_gets_placeholder() {
        let temp = TempDir::new().unwrap();
        let db = live(&temp);
        let creator = BackupCreator::new();
        let reaper = DirectoryReaper::new();
        let dest = temp.path().join("bundle.zip");

        let summary = ArchiveBuilder::new(&creator, &reaper)
            .create_bundled_backup(&db, &temp.path().join("no_images"), temp.path(), &dest)
            .unwrap();

        assert_eq!(summary.asset_files, 0);
        assert_eq!(entry_names(&dest), vec![DB_ENTRY.to_string(), "dental_images/".to_string()]);
    }

    #[test]
    fn test_temp_snapshot_removed_on_failure() {
        let temp = TempDir::new().unwrap();
        let db = live(&temp);
        let work = temp.path().join("work");
        let creator = BackupCreator::new();
        let reaper = DirectoryReaper::new();
        let dest = temp.path().join("bundle.zip");

        let _fault = fault_point::arm(points::BUNDLE_BEFORE_FINISH);
        assert!(ArchiveBuilder::new(&creator, &reaper)
            .create_bundled_backup(&db, &temp.path().join("none"), &work, &dest)
            .is_err());

        assert!(!dest.exists());
        assert!(!sibling(&dest, ".partial").exists());
        assert_eq!(fs::read_dir(&work).unwrap().count(), 0);
    }
}
