//! Removal rungs, cheapest first

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use walkdir::WalkDir;

use crate::errors::{VaultError, VaultResult};
use crate::fault_point::{self, points};

/// One way of removing a file or directory tree
pub trait RemovalStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Remove `path` completely. A missing path is success.
    fn remove(&self, path: &Path) -> VaultResult<()>;
}

fn retry_io<F>(attempts: u32, delay_for: impl Fn(u32) -> Duration, mut op: F) -> io::Result<()>
where
    F: FnMut() -> io::Result<()>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt >= attempts => return Err(e),
            Err(_) => {
                thread::sleep(delay_for(attempt));
                attempt += 1;
            }
        }
    }
}

/// `remove_dir_all` / `remove_file` with linear backoff between attempts
pub struct NativeRemove {
    attempts: u32,
    delay: Duration,
}

impl NativeRemove {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

impl Default for NativeRemove {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

impl RemovalStrategy for NativeRemove {
    fn name(&self) -> &'static str {
        "native_remove"
    }

    fn remove(&self, path: &Path) -> VaultResult<()> {
        let delay = self.delay;
        retry_io(self.attempts, |n| delay * n, || {
            fault_point::check(points::REAPER_NATIVE_REMOVE)?;
            let meta = fs::symlink_metadata(path)?;
            if meta.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            }
        })
        .map_err(|e| VaultError::io_error_at_path(path, e))
    }
}

/// Delete each file with exponential backoff, then directories bottom-up
pub struct ManualWalk {
    attempts_per_entry: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ManualWalk {
    pub fn new(attempts_per_entry: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts_per_entry: attempts_per_entry.max(1),
            base_delay,
            max_delay,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt - 1).min(16);
        (self.base_delay * factor).min(self.max_delay)
    }
}

impl Default for ManualWalk {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_secs(1))
    }
}

impl RemovalStrategy for ManualWalk {
    fn name(&self) -> &'static str {
        "manual_walk"
    }

    fn remove(&self, path: &Path) -> VaultResult<()> {
        fault_point::check(points::REAPER_MANUAL_WALK)
            .map_err(|e| VaultError::io_error_at_path(path, e))?;

        let mut first_failure: Option<VaultError> = None;

        // contents_first yields every child before its parent directory
        for entry in WalkDir::new(path).contents_first(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let at = e.path().unwrap_or(path).to_path_buf();
                    let io_err = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk loop"));
                    if io_err.kind() != io::ErrorKind::NotFound && first_failure.is_none() {
                        first_failure = Some(VaultError::io_error_at_path(&at, io_err));
                    }
                    continue;
                }
            };

            let entry_path = entry.path();
            let is_dir = entry.file_type().is_dir();
            let result = retry_io(self.attempts_per_entry, |n| self.backoff(n), || {
                if is_dir {
                    fs::remove_dir(entry_path)
                } else {
                    clear_readonly(entry_path);
                    fs::remove_file(entry_path)
                }
            });

            if let Err(e) = result {
                if first_failure.is_none() {
                    first_failure = Some(VaultError::io_error_at_path(entry_path, e));
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn clear_readonly(path: &Path) {
    if let Ok(meta) = fs::symlink_metadata(path) {
        let mut perms = meta.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            let _ = fs::set_permissions(path, perms);
        }
    }
}

/// `cmd /C rmdir /s /q`, for files held by other Windows processes
#[cfg(windows)]
pub struct ShellRemove;

#[cfg(windows)]
impl RemovalStrategy for ShellRemove {
    fn name(&self) -> &'static str {
        "shell_remove"
    }

    fn remove(&self, path: &Path) -> VaultResult<()> {
        use std::process::Command;

        let is_dir = fs::symlink_metadata(path).map(|m| m.is_dir()).unwrap_or(true);
        let args: &[&str] = if is_dir {
            &["/C", "rmdir", "/s", "/q"]
        } else {
            &["/C", "del", "/f", "/q"]
        };
        let status = Command::new("cmd")
            .args(args)
            .arg(path)
            .status()
            .map_err(|e| VaultError::io_error_at_path(path, e))?;

        if !status.success() && path.exists() {
            return Err(VaultError::io_error_at_path(
                path,
                io::Error::new(io::ErrorKind::Other, format!("cmd exited with {}", status)),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populated(temp: &TempDir) -> std::path::PathBuf {
        let root = temp.path().join("tree");
        fs::create_dir_all(root.join("12/14/xray")).unwrap();
        fs::write(root.join("12/14/xray/a.png"), b"png").unwrap();
        fs::write(root.join("12/top.jpg"), b"jpg").unwrap();
        root
    }

    #[test]
    fn test_native_remove_tree() {
        let temp = TempDir::new().unwrap();
        let root = populated(&temp);
        NativeRemove::default().remove(&root).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_native_remove_missing_is_ok() {
        let temp = TempDir::new().unwrap();
        NativeRemove::default()
            .remove(&temp.path().join("absent"))
            .unwrap();
    }

    #[test]
    fn test_native_remove_retries_then_fails() {
        let temp = TempDir::new().unwrap();
        let root = populated(&temp);
        let _fault = fault_point::arm(points::REAPER_NATIVE_REMOVE);

        let strategy = NativeRemove::new(2, Duration::from_millis(1));
        assert!(strategy.remove(&root).is_err());
        assert!(root.exists());
    }

    #[test]
    fn test_manual_walk_removes_bottom_up() {
        let temp = TempDir::new().unwrap();
        let root = populated(&temp);
        ManualWalk::default().remove(&root).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_manual_walk_single_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("temp_backup_1.db");
        fs::write(&file, b"x").unwrap();
        ManualWalk::default().remove(&file).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_backoff_is_capped() {
        let walk = ManualWalk::default();
        assert_eq!(walk.backoff(1), Duration::from_millis(100));
        assert_eq!(walk.backoff(3), Duration::from_millis(400));
        assert_eq!(walk.backoff(5), Duration::from_secs(1));
    }
}
