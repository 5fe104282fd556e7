//! Write-path observability events
//!
//! Events are explicit and typed.

use std::fmt;

/// Observable events on the write path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Encoding side
    /// Encoding context created
    ContextCreated,
    /// Active batch sealed and handed to the coordinator
    BatchSealed,
    /// Every pending mutation of a batch resolved
    BatchResolved,
    /// Whole batch failed (worker, core or coordinator error)
    BatchFailed,
    /// Buffer overflow forced an early flush
    OverflowFlush,
    /// Mutation parked behind an unresolved forward reference
    MutationBlocked,
    /// Schema swapped on a context
    SchemaSwapped,
    /// Last context handle dropped; its open batch was handed off
    ContextClosed,

    // Coordinator
    /// Coordinator event loop started
    CoordinatorStarted,
    /// Coordinator event loop stopped
    CoordinatorStopped,
    /// In-flight region copied out of the shared arena
    RegionDetached,
    /// Batch placed in a private buffer, arena had no room
    RegionPrivate,
    /// Worker thread started
    WorkerStarted,
    /// Worker died and was removed from the pool
    WorkerEvicted,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ContextCreated => "CONTEXT_CREATED",
            Event::BatchSealed => "BATCH_SEALED",
            Event::BatchResolved => "BATCH_RESOLVED",
            Event::BatchFailed => "BATCH_FAILED",
            Event::OverflowFlush => "OVERFLOW_FLUSH",
            Event::MutationBlocked => "MUTATION_BLOCKED",
            Event::SchemaSwapped => "SCHEMA_SWAPPED",
            Event::ContextClosed => "CONTEXT_CLOSED",
            Event::CoordinatorStarted => "COORDINATOR_STARTED",
            Event::CoordinatorStopped => "COORDINATOR_STOPPED",
            Event::RegionDetached => "REGION_DETACHED",
            Event::RegionPrivate => "REGION_PRIVATE",
            Event::WorkerStarted => "WORKER_STARTED",
            Event::WorkerEvicted => "WORKER_EVICTED",
        }
    }

    /// Returns true if this event indicates a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Event::BatchFailed | Event::WorkerEvicted)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(Event::BatchSealed.as_str(), "BATCH_SEALED");
        assert_eq!(Event::RegionDetached.to_string(), "REGION_DETACHED");
    }

    #[test]
    fn test_failure_events() {
        assert!(Event::WorkerEvicted.is_failure());
        assert!(!Event::BatchResolved.is_failure());
    }
}
