//! Durable iteration and loop summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::phase::Phase;
use super::review::IntentSummary;
use super::snapshot::QueueSnapshot;

/// Final outcome of one item's pass through the phase sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IterationOutcome {
    /// All phases succeeded.
    Completed,
    /// Review kept rejecting and the attempt budget ran out.
    RetriesExhausted,
    /// A terminal fault (finalize failure, process crash, lost retry context).
    Blocked,
    /// The implement phase hit its timeout or idle abort.
    TimedOut,
    /// A transient infrastructure fault; the loop may pick the item up again.
    SkippedTransient,
}

impl IterationOutcome {
    /// Whether the iteration counts as a success for the circuit breaker
    /// and skip list.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, IterationOutcome::Completed)
    }

    /// Transient outcomes do not count against the item's skip entry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, IterationOutcome::SkippedTransient)
    }
}

impl std::fmt::Display for IterationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IterationOutcome::Completed => "completed",
            IterationOutcome::RetriesExhausted => "needs-retry-exhausted",
            IterationOutcome::Blocked => "blocked",
            IterationOutcome::TimedOut => "timed-out",
            IterationOutcome::SkippedTransient => "skipped-transient",
        };
        f.write_str(name)
    }
}

/// Derived summary of one phase execution; raw output is not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub duration_secs: f64,
    pub success: bool,
    pub action_count: usize,
    pub error: Option<String>,
}

/// Durable summary of one item's full pass through the phase sequence.
/// This is the unit appended to history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationResult {
    pub item_id: String,
    pub item_title: String,
    pub outcome: IterationOutcome,
    /// IMPLEMENT/REVIEW attempts consumed, including the first.
    pub attempts: u32,
    pub phases: Vec<PhaseSummary>,
    pub total_duration_secs: f64,
    pub intent: Option<IntentSummary>,
    /// Action counts by tool kind, across all phases.
    pub actions_by_kind: BTreeMap<String, u32>,
    pub before: QueueSnapshot,
    pub after: QueueSnapshot,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IterationResult {
    /// Total actions across all phases.
    #[must_use]
    pub fn total_actions(&self) -> u32 {
        self.actions_by_kind.values().sum()
    }

    /// Whether any phase ended in a timeout-class failure.
    #[must_use]
    pub fn had_timeout(&self) -> bool {
        self.outcome == IterationOutcome::TimedOut
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// No ready items remained.
    Exhausted,
    /// Too many recent failures.
    CircuitBreakerOpen,
    /// Configured iteration cap reached.
    IterationLimit,
    /// Operator interrupt.
    ShutdownRequested,
    /// Abnormal halt requiring human attention.
    Escalation,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StopReason::Exhausted => "exhausted",
            StopReason::CircuitBreakerOpen => "circuit-breaker-open",
            StopReason::IterationLimit => "iteration-limit",
            StopReason::ShutdownRequested => "shutdown-requested",
            StopReason::Escalation => "escalation",
        };
        f.write_str(name)
    }
}

/// Aggregate metrics over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopMetrics {
    pub success_rate: f64,
    pub duration_p50_secs: f64,
    pub duration_p90_secs: f64,
    pub timeout_rate: f64,
    pub retry_rate: f64,
    pub total_actions: u32,
}

impl LoopMetrics {
    /// Compute metrics from a run's iteration results.
    #[must_use]
    pub fn from_results(results: &[IterationResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }
        let n = results.len() as f64;
        let successes = results.iter().filter(|r| r.outcome.is_success()).count() as f64;
        let timeouts = results.iter().filter(|r| r.had_timeout()).count() as f64;
        let retried = results.iter().filter(|r| r.attempts > 1).count() as f64;
        let total_actions = results.iter().map(IterationResult::total_actions).sum();

        let mut durations: Vec<f64> = results.iter().map(|r| r.total_duration_secs).collect();
        durations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Self {
            success_rate: successes / n,
            duration_p50_secs: percentile(&durations, 0.50),
            duration_p90_secs: percentile(&durations, 0.90),
            timeout_rate: timeouts / n,
            retry_rate: retried / n,
            total_actions,
        }
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

/// Final summary for an entire run. Written once at loop termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub iterations: u32,
    pub stop_reason: StopReason,
    pub results: Vec<IterationResult>,
    pub metrics: LoopMetrics,
}
