//! Configuration for the Foreman iteration controller.
//!
//! Named constants for timeouts, retry bounds, and truncation limits,
//! plus the runtime settings struct assembled from the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{ForemanError, Result};
use crate::models::Phase;

// =============================================================================
// Named constants
// =============================================================================

/// Default per-phase timeouts in seconds.
pub const IMPLEMENT_TIMEOUT_SECS: u64 = 1800;
pub const REVIEW_TIMEOUT_SECS: u64 = 600;
pub const FINALIZE_TIMEOUT_SECS: u64 = 300;
pub const ACCEPT_TIMEOUT_SECS: u64 = 300;

/// Seconds with no worker output before the idle policy applies.
pub const IDLE_THRESHOLD_SECS: u64 = 120;

/// Poll interval while multiplexing worker output.
pub const OUTPUT_POLL_INTERVAL_MS: u64 = 250;

/// Default retry attempts per item after a needs-changes verdict.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Retry backoff bounds.
pub const BACKOFF_BASE_SECS: u64 = 2;
pub const BACKOFF_MAX_SECS: u64 = 60;
/// Jitter applied to each backoff delay, as a fraction of the delay.
pub const BACKOFF_JITTER_FRACTION: f64 = 0.2;

/// Circuit breaker: loop halts when the last `threshold` outcomes in a
/// window of `window` iterations were all failures.
pub const BREAKER_WINDOW: usize = 10;
pub const BREAKER_THRESHOLD: usize = 3;

/// Consecutive iteration failures before an item is skipped.
pub const SKIP_AFTER_FAILURES: u32 = 3;

/// Consecutive unparseable review verdicts tolerated within one iteration.
pub const MAX_UNPARSEABLE_REVIEWS: u32 = 3;

/// Captured phase output is truncated to this many characters.
pub const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

/// Action input/output summaries are clipped to this many characters.
pub const MAX_ACTION_SUMMARY: usize = 200;

/// Recent iteration summaries retained in the status file.
pub const RECENT_SUMMARY_LIMIT: usize = 10;

/// Timeout for any single tracking-subsystem call.
pub const TRACKER_CALL_TIMEOUT_SECS: u64 = 30;

/// Pause before re-querying the tracker after a selection fault.
pub const SELECTION_RETRY_DELAY_SECS: u64 = 5;

/// Consecutive selection faults tolerated before the loop escalates.
pub const MAX_SELECTION_FAULTS: u32 = 5;

/// Default state directory name.
pub const STATE_DIR: &str = ".foreman";

// =============================================================================
// Idle policy
// =============================================================================

/// What to do when a phase produces no output past the idle threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum IdlePolicy {
    /// Keep waiting until the hard timeout.
    Wait,
    /// Terminate the worker and fail the phase as stalled.
    Terminate,
    /// Fail the phase but let the worker run to its own exit.
    Fail,
}

impl std::fmt::Display for IdlePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdlePolicy::Wait => write!(f, "wait"),
            IdlePolicy::Terminate => write!(f, "terminate"),
            IdlePolicy::Fail => write!(f, "fail"),
        }
    }
}

// =============================================================================
// Runtime settings
// =============================================================================

/// Runtime knobs for one loop run.
///
/// Defaults come from the named constants above; the CLI overrides
/// individual fields via the `with_*` builders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSettings {
    /// Maximum loop iterations before stopping.
    pub max_iterations: u32,
    /// Retry attempts per item after a needs-changes verdict.
    pub retry_attempts: u32,
    /// Per-phase timeout overrides in seconds (implement, review, finalize, accept).
    pub implement_timeout_secs: u64,
    pub review_timeout_secs: u64,
    pub finalize_timeout_secs: u64,
    pub accept_timeout_secs: u64,
    /// Seconds of silence before the idle policy applies.
    pub idle_threshold_secs: u64,
    /// Action taken when the idle threshold is crossed.
    pub idle_policy: IdlePolicy,
    /// Circuit breaker window size and failure threshold.
    pub breaker_window: usize,
    pub breaker_threshold: usize,
    /// Consecutive failures before an item is skipped.
    pub skip_after_failures: u32,
    /// Worker command: program followed by base arguments.
    pub worker_command: Vec<String>,
    /// Tracker command: program followed by base arguments.
    pub tracker_command: Vec<String>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            implement_timeout_secs: IMPLEMENT_TIMEOUT_SECS,
            review_timeout_secs: REVIEW_TIMEOUT_SECS,
            finalize_timeout_secs: FINALIZE_TIMEOUT_SECS,
            accept_timeout_secs: ACCEPT_TIMEOUT_SECS,
            idle_threshold_secs: IDLE_THRESHOLD_SECS,
            idle_policy: IdlePolicy::Terminate,
            breaker_window: BREAKER_WINDOW,
            breaker_threshold: BREAKER_THRESHOLD,
            skip_after_failures: SKIP_AFTER_FAILURES,
            worker_command: vec!["claude".to_string()],
            tracker_command: vec!["tracker".to_string()],
        }
    }
}

impl LoopSettings {
    /// Set the maximum iteration count.
    #[must_use]
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the retry attempt budget per item.
    #[must_use]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the idle threshold and policy.
    #[must_use]
    pub fn with_idle(mut self, threshold_secs: u64, policy: IdlePolicy) -> Self {
        self.idle_threshold_secs = threshold_secs;
        self.idle_policy = policy;
        self
    }

    /// Set the worker command (program plus base arguments).
    #[must_use]
    pub fn with_worker_command(mut self, command: Vec<String>) -> Self {
        self.worker_command = command;
        self
    }

    /// Set the tracker command (program plus base arguments).
    #[must_use]
    pub fn with_tracker_command(mut self, command: Vec<String>) -> Self {
        self.tracker_command = command;
        self
    }

    /// Set the circuit breaker window and threshold.
    #[must_use]
    pub fn with_breaker(mut self, window: usize, threshold: usize) -> Self {
        self.breaker_window = window;
        self.breaker_threshold = threshold;
        self
    }

    /// Timeout for the given phase.
    #[must_use]
    pub fn phase_timeout(&self, phase: Phase) -> Duration {
        let secs = match phase {
            Phase::Implement => self.implement_timeout_secs,
            Phase::Review => self.review_timeout_secs,
            Phase::Finalize => self.finalize_timeout_secs,
            Phase::Accept => self.accept_timeout_secs,
        };
        Duration::from_secs(secs)
    }

    /// Validate settings before the loop starts.
    pub fn validate(&self) -> Result<()> {
        if self.worker_command.is_empty() {
            return Err(ForemanError::InvalidConfig {
                field: "worker_command".into(),
                reason: "must name a program".into(),
            });
        }
        if self.tracker_command.is_empty() {
            return Err(ForemanError::InvalidConfig {
                field: "tracker_command".into(),
                reason: "must name a program".into(),
            });
        }
        if self.breaker_threshold == 0 {
            return Err(ForemanError::InvalidConfig {
                field: "breaker_threshold".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.breaker_window < self.breaker_threshold {
            return Err(ForemanError::InvalidConfig {
                field: "breaker_window".into(),
                reason: "must be at least the breaker threshold".into(),
            });
        }
        if self.max_iterations == 0 {
            return Err(ForemanError::InvalidConfig {
                field: "max_iterations".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// State paths
// =============================================================================

/// File locations under the state directory.
#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    /// Create paths rooted at the given state directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default state directory under a project directory.
    #[must_use]
    pub fn for_project(project_dir: &Path) -> Self {
        Self::new(project_dir.join(STATE_DIR))
    }

    /// The state directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Live status file, overwritten atomically.
    #[must_use]
    pub fn status_file(&self) -> PathBuf {
        self.root.join("status.json")
    }

    /// Append-only iteration history.
    #[must_use]
    pub fn history_file(&self) -> PathBuf {
        self.root.join("history.jsonl")
    }

    /// Final loop report.
    #[must_use]
    pub fn report_file(&self) -> PathBuf {
        self.root.join("report.json")
    }

    /// Escalation report written on a circuit-breaker trip.
    #[must_use]
    pub fn escalation_file(&self) -> PathBuf {
        self.root.join("escalation.md")
    }

    /// Retry context handed to the worker on retry attempts.
    #[must_use]
    pub fn retry_context_file(&self) -> PathBuf {
        self.root.join("retry_context.json")
    }

    /// Pid file for the running loop.
    #[must_use]
    pub fn pid_file(&self) -> PathBuf {
        self.root.join("foreman.pid")
    }

    /// Log file for the tracing file layer.
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.root.join("foreman.log")
    }

    /// Ensure the state directory exists.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = LoopSettings::default();
        assert_eq!(settings.max_iterations, 50);
        assert_eq!(settings.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(settings.idle_policy, IdlePolicy::Terminate);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let settings = LoopSettings::default()
            .with_max_iterations(3)
            .with_retry_attempts(2)
            .with_idle(30, IdlePolicy::Wait)
            .with_breaker(5, 2);
        assert_eq!(settings.max_iterations, 3);
        assert_eq!(settings.retry_attempts, 2);
        assert_eq!(settings.idle_threshold_secs, 30);
        assert_eq!(settings.idle_policy, IdlePolicy::Wait);
        assert_eq!(settings.breaker_window, 5);
        assert_eq!(settings.breaker_threshold, 2);
    }

    #[test]
    fn test_phase_timeouts() {
        let settings = LoopSettings::default();
        assert_eq!(
            settings.phase_timeout(Phase::Implement),
            Duration::from_secs(IMPLEMENT_TIMEOUT_SECS)
        );
        assert_eq!(
            settings.phase_timeout(Phase::Review),
            Duration::from_secs(REVIEW_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_validate_rejects_empty_worker() {
        let settings = LoopSettings::default().with_worker_command(vec![]);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_breaker() {
        let settings = LoopSettings::default().with_breaker(2, 5);
        assert!(settings.validate().is_err());

        let settings = LoopSettings::default().with_breaker(5, 0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_state_paths() {
        let paths = StatePaths::for_project(Path::new("/work/project"));
        assert_eq!(
            paths.status_file(),
            PathBuf::from("/work/project/.foreman/status.json")
        );
        assert_eq!(
            paths.history_file(),
            PathBuf::from("/work/project/.foreman/history.jsonl")
        );
        assert_eq!(
            paths.retry_context_file(),
            PathBuf::from("/work/project/.foreman/retry_context.json")
        );
    }

    #[test]
    fn test_idle_policy_display() {
        assert_eq!(IdlePolicy::Wait.to_string(), "wait");
        assert_eq!(IdlePolicy::Terminate.to_string(), "terminate");
        assert_eq!(IdlePolicy::Fail.to_string(), "fail");
    }
}
