//! Custom error types for Foreman.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the application.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Foreman operations
#[derive(Error, Debug)]
pub enum ForemanError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load or validate configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Worker binary not found on PATH
    #[error("Missing worker binary: {program}")]
    MissingWorker { program: String },

    // =========================================================================
    // Phase Execution Errors
    // =========================================================================
    /// Phase exceeded its time budget
    #[error("Phase {phase} timed out after {seconds}s")]
    Timeout { phase: String, seconds: u64 },

    /// Phase stalled with no output past the idle threshold
    #[error("Phase {phase} idle for {seconds}s with no output")]
    Idle { phase: String, seconds: u64 },

    /// Worker process exited non-zero or crashed
    #[error("Worker process failed in phase {phase} (exit code {exit_code}): {message}")]
    Process {
        phase: String,
        exit_code: i32,
        message: String,
    },

    /// Malformed structured event in the worker stream
    #[error("Event decode error: {message}")]
    Decode { message: String },

    /// Worker stopped speaking the review protocol
    #[error("Review verdict unparseable {count} times in a row")]
    UnparseableReviews { count: u32 },

    // =========================================================================
    // External Subsystem Errors
    // =========================================================================
    /// Tracking subsystem call failed or timed out
    #[error("Tracker operation '{operation}' failed: {message}")]
    Tracker { operation: String, message: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Retry context file could not be written
    #[error("Failed to write retry context to {path}: {message}")]
    RetryContext { path: PathBuf, message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ForemanError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error for a phase
    pub fn timeout(phase: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            phase: phase.into(),
            seconds,
        }
    }

    /// Create an idle error for a phase
    pub fn idle(phase: impl Into<String>, seconds: u64) -> Self {
        Self::Idle {
            phase: phase.into(),
            seconds,
        }
    }

    /// Create a process failure error
    pub fn process(phase: impl Into<String>, exit_code: i32, message: impl Into<String>) -> Self {
        Self::Process {
            phase: phase.into(),
            exit_code,
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a tracker error
    pub fn tracker(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tracker {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a retry-context error
    pub fn retry_context(path: PathBuf, message: impl Into<String>) -> Self {
        Self::RetryContext {
            path,
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is transient (the loop may retry next cycle)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Tracker { .. } | Self::Decode { .. })
    }

    /// Check if this error is a timeout-class failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Idle { .. })
    }

    /// Check if this error is fatal (should abort the run)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::InvalidConfig { .. } | Self::MissingWorker { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            Self::MissingWorker { .. } => 6,
            Self::Timeout { .. } | Self::Idle { .. } => 3,
            Self::Tracker { .. } => 4,
            _ => 1,
        }
    }
}

/// Type alias for Foreman results
pub type Result<T> = std::result::Result<T, ForemanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ForemanError::timeout("implement", 900);
        assert!(err.to_string().contains("implement"));
        assert!(err.to_string().contains("900"));
    }

    #[test]
    fn test_is_transient() {
        assert!(ForemanError::tracker("ready", "timed out").is_transient());
        assert!(ForemanError::decode("bad line").is_transient());
        assert!(!ForemanError::timeout("review", 60).is_transient());
    }

    #[test]
    fn test_is_timeout() {
        assert!(ForemanError::timeout("implement", 10).is_timeout());
        assert!(ForemanError::idle("implement", 10).is_timeout());
        assert!(!ForemanError::process("implement", 2, "boom").is_timeout());
    }

    #[test]
    fn test_is_fatal() {
        assert!(ForemanError::config("bad").is_fatal());
        assert!(ForemanError::MissingWorker {
            program: "claude".into()
        }
        .is_fatal());
        assert!(!ForemanError::timeout("review", 60).is_fatal());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ForemanError::config("bad").exit_code(), 7);
        assert_eq!(
            ForemanError::MissingWorker {
                program: "claude".into()
            }
            .exit_code(),
            6
        );
        assert_eq!(ForemanError::timeout("implement", 1).exit_code(), 3);
        assert_eq!(ForemanError::tracker("ready", "down").exit_code(), 4);
        assert_eq!(ForemanError::decode("x").exit_code(), 1);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: ForemanError = io_err.into();
        assert!(matches!(err, ForemanError::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_retry_context_error() {
        let err = ForemanError::retry_context(PathBuf::from("/tmp/ctx.json"), "disk full");
        assert!(err.to_string().contains("ctx.json"));
        assert!(err.to_string().contains("disk full"));
    }
}
