//! Resolution and classification of restore sources
//!
//! A path without a usable file is resolved by probing `<path>.zip`,
//! `<path>.db` and `<path>.json` in that order. The kind is decided by
//! content; the extension only breaks ties and picks the error code.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::errors::{VaultError, VaultResult};
use crate::fsutil::sibling;
use crate::observability::{log_event_with_fields, Event};

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const PROBE_SUFFIXES: [&str; 3] = [".zip", ".db", ".json"];

/// What a restore source contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// Bare SQLite file
    DatabaseOnly,
    /// Zip bundle with database and asset tree
    Bundle,
    /// Row-by-row JSON export
    LegacyExport,
}

impl CandidateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateKind::DatabaseOnly => "database_only",
            CandidateKind::Bundle => "bundle",
            CandidateKind::LegacyExport => "legacy_export",
        }
    }
}

/// A resolved, classified restore source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreCandidate {
    pub path: PathBuf,
    pub kind: CandidateKind,
}

/// Resolve `requested` to an existing file and classify it
pub fn classify(requested: &Path) -> VaultResult<RestoreCandidate> {
    let path = resolve(requested).ok_or_else(|| {
        VaultError::source_unavailable(format!("Backup file not found: {}", requested.display()))
    })?;

    let mut header = [0u8; 16];
    let read = read_header(&path, &mut header)?;
    if read == 0 {
        return Err(VaultError::source_unavailable(format!(
            "Backup file is empty: {}",
            path.display()
        )));
    }

    let kind = sniff(&header[..read]).ok_or_else(|| {
        let message = format!("Unrecognized backup content: {}", path.display());
        if has_extension(&path, "zip") {
            VaultError::archive_corrupt(message)
        } else {
            VaultError::source_unavailable(message)
        }
    })?;

    log_event_with_fields(
        Event::RestoreSourceClassified,
        &[
            ("path", &path.display().to_string()),
            ("kind", kind.as_str()),
        ],
    );
    Ok(RestoreCandidate { path, kind })
}

fn resolve(requested: &Path) -> Option<PathBuf> {
    if requested.is_file() {
        return Some(requested.to_path_buf());
    }
    if let Some(found) = PROBE_SUFFIXES
        .iter()
        .map(|suffix| sibling(requested, suffix))
        .find(|p| p.is_file())
    {
        return Some(found);
    }
    // a `.db`/`.zip` name whose legacy export survived under `.json`
    if has_extension(requested, "db") || has_extension(requested, "zip") {
        let json = requested.with_extension("json");
        if json.is_file() {
            return Some(json);
        }
    }
    None
}

fn read_header(path: &Path, buf: &mut [u8]) -> VaultResult<usize> {
    let mut file = File::open(path).map_err(|e| VaultError::io_error_at_path(path, e))?;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file
            .read(&mut buf[filled..])
            .map_err(|e| VaultError::io_error_at_path(path, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn sniff(header: &[u8]) -> Option<CandidateKind> {
    if header.starts_with(SQLITE_MAGIC) {
        return Some(CandidateKind::DatabaseOnly);
    }
    if header.starts_with(ZIP_MAGIC) {
        return Some(CandidateKind::Bundle);
    }
    let first = header.iter().find(|b| !b.is_ascii_whitespace());
    match first {
        Some(b'{') => Some(CandidateKind::LegacyExport),
        // UTF-8 byte order mark
        Some(0xEF) if header.starts_with(&[0xEF, 0xBB, 0xBF]) && header.get(3) == Some(&b'{') => {
            Some(CandidateKind::LegacyExport)
        }
        _ => None,
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VaultErrorCode;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_source_unavailable() {
        let err = classify(Path::new("/does/not/exist")).unwrap_err();
        assert_eq!(err.code(), VaultErrorCode::SourceUnavailable);
    }

    #[test]
    fn test_empty_file_unavailable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.db");
        fs::write(&path, b"").unwrap();
        assert_eq!(
            classify(&path).unwrap_err().code(),
            VaultErrorCode::SourceUnavailable
        );
    }

    #[test]
    fn test_content_overrides_extension() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mislabeled.zip");
        fs::write(&path, b"SQLite format 3\0rest-of-page").unwrap();
        assert_eq!(classify(&path).unwrap().kind, CandidateKind::DatabaseOnly);
    }

    #[test]
    fn test_garbage_zip_is_corrupt_archive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.zip");
        fs::write(&path, b"definitely not an archive").unwrap();
        assert_eq!(
            classify(&path).unwrap_err().code(),
            VaultErrorCode::ArchiveCorrupt
        );
    }

    #[test]
    fn test_extensionless_probe_order() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("backup_1");
        fs::write(sibling(&base, ".db"), b"SQLite format 3\0").unwrap();
        fs::write(sibling(&base, ".json"), b"{}").unwrap();

        let found = classify(&base).unwrap();
        assert_eq!(found.path, sibling(&base, ".db"));

        fs::write(sibling(&base, ".zip"), b"PK\x03\x04rest").unwrap();
        assert_eq!(classify(&base).unwrap().kind, CandidateKind::Bundle);
    }

    #[test]
    fn test_legacy_json_fallback() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("old.json"), b"  {\"metadata\":{}}").unwrap();
        let found = classify(&temp.path().join("old.db")).unwrap();
        assert_eq!(found.kind, CandidateKind::LegacyExport);
        assert_eq!(found.path, temp.path().join("old.json"));
    }
}
