//! Observability for the backup engine
//!
//! - Structured JSON logging, one line per event
//! - A closed vocabulary of lifecycle events
//! - Scoped begin/complete tracing for multi-step operations
//!
//! Logging never changes engine behaviour: write failures are swallowed.
//!
//! ```ignore
//! use dentavault::observability::{log_event_with_fields, Event, ObservationScope};
//!
//! log_event_with_fields(Event::RestoreStage, &[("stage", "extracting")]);
//!
//! let scope = ObservationScope::new("RESTORE");
//! // ... do work ...
//! scope.complete();
//! ```

mod events;
mod logger;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use scope::{ObservationScope, Timer};

/// Log a lifecycle event at its default severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a lifecycle event with fields at its default severity
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::ConfigLoaded);
        log_event(Event::RegistryLoaded);
    }

    #[test]
    fn test_log_event_with_fields() {
        log_event_with_fields(Event::RestoreStage, &[("stage", "init"), ("percent", "0")]);
    }
}
