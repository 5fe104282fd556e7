//! Observability for the write path
//!
//! - Structured logging (JSON lines)
//! - Monotonic counters
//! - Typed lifecycle events
//!
//! Observability never changes pipeline behavior: logging failures are
//! swallowed and counters are relaxed atomics.

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log a lifecycle event with fields
///
/// Failure events log at ERROR, everything else at the given severity.
pub fn log_event(severity: Severity, event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_failure() {
        severity.max(Severity::Error)
    } else {
        severity
    };
    Logger::log(severity, event.as_str(), fields);
}
