//! Bundle extraction
//!
//! Every entry must resolve inside the destination directory; an entry
//! that would escape it makes the whole bundle corrupt.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use super::{ASSETS_ENTRY, DB_ENTRY};
use crate::errors::{VaultError, VaultResult};

/// Layout of an extracted bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedBundle {
    pub root: PathBuf,
    pub database: PathBuf,
    /// Present when the bundle carried an asset folder
    pub assets: Option<PathBuf>,
}

/// Extract `archive` into `dest_dir` and locate its parts
pub fn extract_bundle(archive: &Path, dest_dir: &Path) -> VaultResult<ExtractedBundle> {
    let file = File::open(archive).map_err(|e| VaultError::io_error_at_path(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| {
        VaultError::archive_corrupt(format!("Not a readable bundle: {}", archive.display()))
            .with_source(e)
    })?;

    fs::create_dir_all(dest_dir).map_err(|e| VaultError::io_error_at_path(dest_dir, e))?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            VaultError::archive_corrupt(format!(
                "Bundle entry escapes extraction directory: {}",
                entry.name()
            ))
        })?;
        let out_path = dest_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| VaultError::io_error_at_path(&out_path, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| VaultError::io_error_at_path(parent, e))?;
        }
        let mut out = File::create(&out_path).map_err(|e| VaultError::io_error_at_path(&out_path, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| {
            VaultError::archive_corrupt(format!("Failed to extract {}", entry.name())).with_source(e)
        })?;
    }

    let database = dest_dir.join(DB_ENTRY);
    if !database.is_file() {
        return Err(VaultError::archive_corrupt(format!(
            "Bundle has no {} entry",
            DB_ENTRY
        )));
    }

    let assets_dir = dest_dir.join(ASSETS_ENTRY);
    let assets = if assets_dir.is_dir() {
        Some(assets_dir)
    } else {
        None
    };

    Ok(ExtractedBundle {
        root: dest_dir.to_path_buf(),
        database,
        assets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VaultErrorCode;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])], dirs: &[&str]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default();
        for dir in dirs {
            zip.add_directory(*dir, options).unwrap();
        }
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_extract_full_bundle() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("b.zip");
        write_zip(
            &bundle,
            &[
                (DB_ENTRY, b"SQLite format 3\0"),
                ("dental_images/4/21/after/x.jpg", b"jpg"),
            ],
            &["dental_images/"],
        );

        let out = temp.path().join("out");
        let extracted = extract_bundle(&bundle, &out).unwrap();
        assert_eq!(extracted.database, out.join(DB_ENTRY));
        assert_eq!(extracted.assets, Some(out.join(ASSETS_ENTRY)));
        assert!(out.join("dental_images/4/21/after/x.jpg").is_file());
    }

    #[test]
    fn test_bundle_without_assets() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("b.zip");
        write_zip(&bundle, &[(DB_ENTRY, b"SQLite format 3\0")], &[]);

        let extracted = extract_bundle(&bundle, &temp.path().join("out")).unwrap();
        assert!(extracted.assets.is_none());
    }

    #[test]
    fn test_missing_database_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("b.zip");
        write_zip(&bundle, &[("dental_images/a.png", b"png")], &[]);

        let err = extract_bundle(&bundle, &temp.path().join("out")).unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::ArchiveCorrupt);
    }

    #[test]
    fn test_escaping_entry_rejected() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("b.zip");
        write_zip(&bundle, &[("../evil.txt", b"x"), (DB_ENTRY, b"db")], &[]);

        let err = extract_bundle(&bundle, &temp.path().join("out")).unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::ArchiveCorrupt);
        assert!(!temp.path().join("evil.txt").exists());
    }

    #[test]
    fn test_not_a_zip() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("b.zip");
        fs::write(&bundle, b"plain text").unwrap();

        let err = extract_bundle(&bundle, &temp.path().join("out")).unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::ArchiveCorrupt);
    }
}
