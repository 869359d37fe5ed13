//! Process-wide exclusivity for backup, restore and maintenance
//!
//! At most one engine operation runs per live database at a time.
//! `try_begin` moves the guard out of `Idle` with a single
//! compare-and-swap and hands back a ticket; dropping the ticket returns
//! the guard to `Idle`, including on early error returns and unwinding.
//!
//! Guards obtained through `for_database` are shared by every engine in
//! the process that opens the same file.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::errors::{VaultError, VaultResult};
use crate::observability::{log_event_with_fields, Event};

/// What the engine is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationState {
    Idle = 0,
    BackingUp = 1,
    Restoring = 2,
    /// Delete, prune or asset synchronization
    Maintaining = 3,
}

impl OperationState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => OperationState::BackingUp,
            2 => OperationState::Restoring,
            3 => OperationState::Maintaining,
            _ => OperationState::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Idle => "idle",
            OperationState::BackingUp => "backing_up",
            OperationState::Restoring => "restoring",
            OperationState::Maintaining => "maintaining",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared exclusivity flag; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct OperationGuard {
    state: Arc<AtomicU8>,
}

impl OperationGuard {
    /// A guard private to its clones
    pub fn new() -> Self {
        Self::default()
    }

    /// The guard shared by every holder of the same database file
    ///
    /// Paths are compared after canonicalization. The shared state lives
    /// as long as some guard or ticket for it does.
    pub fn for_database(path: &Path) -> Self {
        static GUARDS: OnceLock<Mutex<HashMap<PathBuf, Weak<AtomicU8>>>> = OnceLock::new();

        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut guards = GUARDS
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guards.retain(|_, state| state.strong_count() > 0);

        if let Some(state) = guards.get(&key).and_then(Weak::upgrade) {
            return Self { state };
        }
        let state = Arc::new(AtomicU8::new(OperationState::Idle as u8));
        guards.insert(key, Arc::downgrade(&state));
        Self { state }
    }

    /// Claim the guard for `next`, or fail with `OperationInProgress`
    pub fn try_begin(&self, next: OperationState) -> VaultResult<OperationTicket> {
        debug_assert!(next != OperationState::Idle);
        match self.state.compare_exchange(
            OperationState::Idle as u8,
            next as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(OperationTicket {
                state: Arc::clone(&self.state),
                held: next,
            }),
            Err(current) => {
                let current = OperationState::from_u8(current);
                log_event_with_fields(
                    Event::GuardRejected,
                    &[("current", current.as_str()), ("requested", next.as_str())],
                );
                Err(VaultError::operation_in_progress(current))
            }
        }
    }

    /// Current state
    pub fn state(&self) -> OperationState {
        OperationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_idle(&self) -> bool {
        self.state() == OperationState::Idle
    }
}

/// Proof of exclusive access; releases the guard on drop
#[derive(Debug)]
pub struct OperationTicket {
    state: Arc<AtomicU8>,
    held: OperationState,
}

impl OperationTicket {
    pub fn held(&self) -> OperationState {
        self.held
    }
}

impl Drop for OperationTicket {
    fn drop(&mut self) {
        self.state
            .store(OperationState::Idle as u8, Ordering::Release);
    }
}
