//! Fault injection for restore and capture testing
//!
//! Two mechanisms share one set of point names:
//!
//! - `DENTAVAULT_CRASH_POINT=<name>` aborts the process at that point
//!   (no cleanup, no unwinding), for out-of-process crash tests.
//! - `arm(name)` makes `check(name)` on the current thread return an
//!   injected I/O error until the returned guard is dropped, for
//!   in-process rollback tests.
//!
//! Both are no-ops unless explicitly enabled.
//!
//! ```ignore
//! use dentavault::fault_point::{check, points};
//!
//! check(points::RESTORE_AFTER_REPLACE)?;
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::io;
use std::sync::OnceLock;

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

thread_local! {
    static ARMED: RefCell<HashSet<&'static str>> = RefCell::new(HashSet::new());
}

/// Returns true if `DENTAVAULT_CRASH_POINT` names this point
fn crash_point_enabled(name: &str) -> bool {
    CRASH_POINT
        .get_or_init(|| std::env::var("DENTAVAULT_CRASH_POINT").ok())
        .as_deref()
        == Some(name)
}

/// Abort the process if the named crash point is enabled
fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// Disarms its point when dropped
#[must_use = "the fault is disarmed as soon as the guard is dropped"]
pub struct ArmedFault {
    name: &'static str,
}

impl Drop for ArmedFault {
    fn drop(&mut self) {
        ARMED.with(|armed| {
            armed.borrow_mut().remove(self.name);
        });
    }
}

/// Arm a fault point on the current thread
pub fn arm(name: &'static str) -> ArmedFault {
    ARMED.with(|armed| {
        armed.borrow_mut().insert(name);
    });
    ArmedFault { name }
}

/// Pass through a fault point
///
/// Aborts if the crash point is configured, fails if the point is armed
/// on this thread, otherwise returns `Ok(())`.
#[inline]
pub fn check(name: &'static str) -> io::Result<()> {
    maybe_crash(name);
    let armed = ARMED.with(|armed| armed.borrow().contains(name));
    if armed {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("injected fault at {}", name),
        ));
    }
    Ok(())
}

/// All defined fault point names
pub mod points {
    // Capture strategies
    pub const CAPTURE_ONLINE_BACKUP: &str = "capture_online_backup";
    pub const CAPTURE_VACUUM_INTO: &str = "capture_vacuum_into";
    pub const CAPTURE_RAW_COPY: &str = "capture_raw_copy";

    // Bundle assembly
    pub const BUNDLE_BEFORE_FINISH: &str = "bundle_before_finish";

    // Restore swap window
    pub const RESTORE_AFTER_ROLLBACK_SNAPSHOT: &str = "restore_after_rollback_snapshot";
    pub const RESTORE_AFTER_CLOSE: &str = "restore_after_close";
    pub const RESTORE_AFTER_REPLACE: &str = "restore_after_replace";
    pub const RESTORE_AFTER_REINITIALIZE: &str = "restore_after_reinitialize";
    pub const RESTORE_DURING_ASSETS: &str = "restore_during_assets";

    // Directory removal rungs
    pub const REAPER_NATIVE_REMOVE: &str = "reaper_native_remove";
    pub const REAPER_MANUAL_WALK: &str = "reaper_manual_walk";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unarmed_point_passes() {
        assert!(check(points::RESTORE_AFTER_CLOSE).is_ok());
    }

    #[test]
    fn test_armed_point_fails_until_dropped() {
        let guard = arm(points::RESTORE_AFTER_REPLACE);
        assert!(check(points::RESTORE_AFTER_REPLACE).is_err());
        assert!(check(points::RESTORE_AFTER_CLOSE).is_ok());
        drop(guard);
        assert!(check(points::RESTORE_AFTER_REPLACE).is_ok());
    }

    #[test]
    fn test_arming_is_thread_local() {
        let _guard = arm(points::CAPTURE_RAW_COPY);
        let other = std::thread::spawn(|| check(points::CAPTURE_RAW_COPY).is_ok())
            .join()
            .unwrap();
        assert!(other);
    }

    #[test]
    fn test_crash_point_disabled_by_default() {
        assert!(!crash_point_enabled("not_a_real_point"));
    }
}
