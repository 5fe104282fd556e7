//! Write-path error types
//!
//! Error codes:
//! - AERO_WRITE_OVERFLOW (ERROR severity, recovered by flush-and-retry)
//! - AERO_WRITE_VALUE_TOO_LARGE (ERROR severity)
//! - AERO_WRITE_VALIDATION (ERROR severity)
//! - AERO_WRITE_MODIFY (ERROR severity)
//! - AERO_WRITE_DEPENDENCY_FAILED (ERROR severity)
//! - AERO_WRITE_WORKER_FAILURE (FATAL severity for the affected batch)
//! - AERO_WRITE_CORE (ERROR severity)
//! - AERO_WRITE_RESULT_TRUNCATED (FATAL severity for the affected batch)
//! - AERO_WRITE_MALFORMED_STREAM (FATAL severity)
//! - AERO_WRITE_COORDINATOR_CLOSED (FATAL severity)
//! - AERO_WRITE_CONTEXT_CLOSED (FATAL severity)
//! - AERO_WRITE_NO_RUNTIME (FATAL severity)
//! - AERO_WRITE_UNSUPPORTED_RUNTIME (FATAL severity)
//! - AERO_WRITE_INVALID_CONFIG (FATAL severity)
//! - AERO_WRITE_UNKNOWN_TYPE (ERROR severity)

use std::fmt;

use thiserror::Error;

/// Result type for write-path operations
pub type WriteResult<T> = Result<T, WriteError>;

/// Severity levels for write-path errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Only the affected mutation fails
    Error,
    /// The batch, context or coordinator cannot continue
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Errors surfaced through mutation calls and their pending futures.
///
/// Cloneable so one batch-level failure can be delivered to every
/// pending mutation of that batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    // ==================
    // Encode Errors
    // ==================
    /// Buffer or arena capacity exceeded
    #[error("Overflow: requested {requested} bytes, capacity is {max}")]
    Overflow { requested: usize, max: usize },

    /// A single mutation does not fit even in an empty batch
    #[error("Value too large: mutation needs {size} bytes, batch limit is {max}")]
    ValueTooLarge { size: usize, max: usize },

    /// Field value violates the schema
    #[error("Validation error on {type_name}: {reason}")]
    Validation { type_name: String, reason: String },

    /// Mutation names a type the schema does not define
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// A referenced pending mutation failed, so this one cannot be encoded
    #[error("Dependency failed: {0}")]
    DependencyFailed(String),

    // ==================
    // Commit Errors
    // ==================
    /// The storage core rejected the mutation during validation
    #[error("Storage core validation error (code {0})")]
    CoreValidation(u8),

    /// The storage core rejected an otherwise well-formed instruction
    #[error("Modify error (code {0})")]
    Modify(u8),

    /// The storage core failed the whole batch
    #[error("Storage core error: {0}")]
    Core(String),

    /// A worker thread terminated while holding the batch
    #[error("Worker {worker} failed")]
    WorkerFailure { worker: usize },

    /// Result table shorter than the batch's mutation count requires
    #[error("Result table truncated: expected {expected} bytes, got {actual}")]
    ResultTableTruncated { expected: usize, actual: usize },

    /// Instruction stream could not be decoded
    #[error("Malformed instruction stream at byte {offset}: {reason}")]
    MalformedStream { offset: usize, reason: String },

    // ==================
    // Lifecycle Errors
    // ==================
    /// Coordinator stopped before the batch completed
    #[error("Coordinator closed")]
    CoordinatorClosed,

    /// Encoding context dropped before the mutation could be committed
    #[error("Write context closed")]
    ContextClosed,

    /// No tokio runtime is available to drive scheduling
    #[error("No tokio runtime available")]
    NoRuntime,

    /// The current runtime cannot honor the configured flush scheduling
    #[error("Unsupported runtime: {0}")]
    UnsupportedRuntime(String),

    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WriteError {
    /// Create a validation error for a type
    pub fn validation(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        WriteError::Validation {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed stream error at a byte offset
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        WriteError::MalformedStream {
            offset,
            reason: reason.into(),
        }
    }

    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            WriteError::Overflow { .. } => "AERO_WRITE_OVERFLOW",
            WriteError::ValueTooLarge { .. } => "AERO_WRITE_VALUE_TOO_LARGE",
            WriteError::Validation { .. } => "AERO_WRITE_VALIDATION",
            WriteError::UnknownType(_) => "AERO_WRITE_UNKNOWN_TYPE",
            WriteError::DependencyFailed(_) => "AERO_WRITE_DEPENDENCY_FAILED",
            WriteError::CoreValidation(_) => "AERO_WRITE_VALIDATION",
            WriteError::Modify(_) => "AERO_WRITE_MODIFY",
            WriteError::Core(_) => "AERO_WRITE_CORE",
            WriteError::WorkerFailure { .. } => "AERO_WRITE_WORKER_FAILURE",
            WriteError::ResultTableTruncated { .. } => "AERO_WRITE_RESULT_TRUNCATED",
            WriteError::MalformedStream { .. } => "AERO_WRITE_MALFORMED_STREAM",
            WriteError::CoordinatorClosed => "AERO_WRITE_COORDINATOR_CLOSED",
            WriteError::ContextClosed => "AERO_WRITE_CONTEXT_CLOSED",
            WriteError::NoRuntime => "AERO_WRITE_NO_RUNTIME",
            WriteError::UnsupportedRuntime(_) => "AERO_WRITE_UNSUPPORTED_RUNTIME",
            WriteError::InvalidConfig(_) => "AERO_WRITE_INVALID_CONFIG",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            WriteError::WorkerFailure { .. }
            | WriteError::ResultTableTruncated { .. }
            | WriteError::MalformedStream { .. }
            | WriteError::CoordinatorClosed
            | WriteError::ContextClosed
            | WriteError::NoRuntime
            | WriteError::UnsupportedRuntime(_)
            | WriteError::InvalidConfig(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns whether this error is fatal
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            WriteError::Overflow { requested: 1, max: 0 }.code(),
            "AERO_WRITE_OVERFLOW"
        );
        assert_eq!(WriteError::Modify(3).code(), "AERO_WRITE_MODIFY");
        assert_eq!(WriteError::CoordinatorClosed.code(), "AERO_WRITE_COORDINATOR_CLOSED");
        assert_eq!(WriteError::ContextClosed.code(), "AERO_WRITE_CONTEXT_CLOSED");
    }

    #[test]
    fn test_validation_is_not_fatal() {
        let err = WriteError::validation("User", "field too long");
        assert!(!err.is_fatal());
        assert_eq!(err.severity(), Severity::Error);
    }

    #[test]
    fn test_worker_failure_is_fatal() {
        assert!(WriteError::WorkerFailure { worker: 1 }.is_fatal());
    }

    #[test]
    fn test_error_display_contains_context() {
        let err = WriteError::ResultTableTruncated {
            expected: 10,
            actual: 5,
        };
        let display = format!("{}", err);
        assert!(display.contains("10"));
        assert!(display.contains("5"));
    }
}
