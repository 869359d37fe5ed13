//! Scoped begin/complete logging for long-running engine operations
//!
//! - `{name}_BEGIN` on creation
//! - `{name}_COMPLETE` or `{name}_FAILED` on explicit close, with `elapsed_ms`
//! - `{name}_INCOMPLETE` if dropped without either (an early `?` return)

use std::time::Instant;

use super::logger::{Logger, Severity};

/// Logs the lifecycle of one operation
///
/// ```ignore
/// let scope = ObservationScope::with_fields("BACKUP", &[("path", "/tmp/x.db")]);
/// let record = do_work()?;      // early return logs BACKUP_INCOMPLETE
/// scope.complete();             // logs BACKUP_COMPLETE
/// ```
pub struct ObservationScope {
    name: &'static str,
    fields: Vec<(&'static str, String)>,
    timer: Timer,
    closed: bool,
}

impl ObservationScope {
    pub fn new(name: &'static str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Create a scope whose fields are repeated on every line it logs
    pub fn with_fields(name: &'static str, fields: &[(&'static str, &str)]) -> Self {
        let scope = Self {
            name,
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            timer: Timer::new(),
            closed: false,
        };
        scope.emit(Severity::Info, "BEGIN", &[], false);
        scope
    }

    /// Add a field to every subsequent line
    pub fn record(&mut self, key: &'static str, value: impl Into<String>) {
        self.fields.push((key, value.into()));
    }

    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    pub fn complete_with_fields(mut self, extra: &[(&str, &str)]) {
        self.closed = true;
        self.emit(Severity::Info, "COMPLETE", extra, true);
    }

    /// Close the scope as failed at ERROR
    pub fn fail(mut self, reason: &str) {
        self.closed = true;
        self.emit(Severity::Error, "FAILED", &[("reason", reason)], true);
    }

    /// Close the scope as failed at FATAL
    pub fn fail_fatal(mut self, reason: &str) {
        self.closed = true;
        self.emit(Severity::Fatal, "FAILED", &[("reason", reason)], true);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn emit(&self, severity: Severity, suffix: &str, extra: &[(&str, &str)], timed: bool) {
        let event = format!("{}_{}", self.name, suffix);
        let elapsed = self.timer.elapsed_ms();
        let mut all: Vec<(&str, &str)> = self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        all.extend(extra.iter().copied());
        if timed {
            all.push(("elapsed_ms", elapsed.as_str()));
        }
        Logger::log(severity, &event, &all);
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.closed {
            self.emit(
                Severity::Warn,
                "INCOMPLETE",
                &[("reason", "scope dropped without completion")],
                true,
            );
        }
    }
}

/// Wall-clock timer for `elapsed_ms` fields
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed milliseconds as a string
    pub fn elapsed_ms(&self) -> String {
        self.start.elapsed().as_millis().to_string()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
