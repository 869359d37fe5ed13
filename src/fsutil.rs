//! File copy, move and checksum helpers
//!
//! Every copy the engine makes of a database file is fsynced before it
//! is relied upon. Rollback copies are additionally CRC32-checked
//! against their source.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use walkdir::WalkDir;

use crate::errors::{VaultError, VaultResult};

/// Copy a file byte-for-byte and fsync the destination
///
/// Returns the number of bytes copied.
pub fn copy_file_synced(src: &Path, dst: &Path) -> VaultResult<u64> {
    let mut src_file = File::open(src).map_err(|e| {
        VaultError::io_error(format!("Failed to open source file: {}", src.display()), e)
    })?;

    let mut dst_file = File::create(dst).map_err(|e| {
        VaultError::io_error(
            format!("Failed to create destination file: {}", dst.display()),
            e,
        )
    })?;

    let copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        VaultError::io_error(
            format!("Failed to copy {} to {}", src.display(), dst.display()),
            e,
        )
    })?;

    dst_file
        .sync_all()
        .map_err(|e| VaultError::io_error(format!("fsync failed for: {}", dst.display()), e))?;

    Ok(copied)
}

/// CRC32 of a whole file, read in chunks
pub fn file_checksum(path: &Path) -> VaultResult<u32> {
    let file = File::open(path).map_err(|e| VaultError::io_error_at_path(path, e))?;

    let mut reader = BufReader::new(file);
    let mut hasher = Hasher::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| VaultError::io_error_at_path(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

/// Copy and confirm the copy matches its source by CRC32
pub fn copy_verified(src: &Path, dst: &Path) -> VaultResult<u32> {
    copy_file_synced(src, dst)?;
    let expected = file_checksum(src)?;
    let actual = file_checksum(dst)?;
    if expected != actual {
        return Err(VaultError::io_error_at_path(
            dst,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "checksum mismatch: crc32:{:08x} != crc32:{:08x}",
                    actual, expected
                ),
            ),
        ));
    }
    Ok(actual)
}

/// Replace `target` with a copy of `src` via a sibling staging file
///
/// `target` is either its old content or the complete new content at
/// every instant; never a partial copy.
pub fn replace_file(src: &Path, target: &Path) -> VaultResult<()> {
    let staging = sibling(target, ".restore-incoming");
    let result = copy_file_synced(src, &staging).and_then(|_| {
        fs::rename(&staging, target).map_err(|e| VaultError::io_error_at_path(target, e))
    });
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

/// Move a file, falling back to copy + remove across filesystems
pub fn move_file(src: &Path, dst: &Path) -> VaultResult<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| VaultError::io_error_at_path(parent, e))?;
    }
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_file_synced(src, dst)?;
    fs::remove_file(src).map_err(|e| VaultError::io_error_at_path(src, e))
}

/// Recursively copy a directory tree, preserving relative paths
///
/// Symlinks are skipped. Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> VaultResult<usize> {
    fs::create_dir_all(dst).map_err(|e| VaultError::io_error_at_path(dst, e))?;

    let mut files = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| {
            let at = e.path().unwrap_or(src).to_path_buf();
            VaultError::io_error_at_path(
                &at,
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk loop")),
            )
        })?;

        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| VaultError::io_error_at_path(entry.path(), io::ErrorKind::Other.into()))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| VaultError::io_error_at_path(&target, e))?;
        } else if entry.file_type().is_file() {
            copy_file_synced(entry.path(), &target)?;
            files += 1;
        }
    }
    Ok(files)
}

/// fsync a directory so renames inside it are durable
pub fn fsync_dir(path: &Path) -> VaultResult<()> {
    #[cfg(unix)]
    {
        let dir = fs::OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| VaultError::io_error_at_path(path, e))?;
        dir.sync_all()
            .map_err(|e| VaultError::io_error(format!("fsync directory failed: {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// `path` with `suffix` appended to its file name
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write bytes to a fresh file and fsync
pub fn write_synced(path: &Path, data: &[u8]) -> VaultResult<()> {
    let mut file = File::create(path).map_err(|e| VaultError::io_error_at_path(path, e))?;
    file.write_all(data)
        .and_then(|_| file.sync_all())
        .map_err(|e| VaultError::io_error_at_path(path, e))
}
