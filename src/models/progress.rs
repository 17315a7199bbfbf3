//! Live progress view, rewritten atomically after every meaningful event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::phase::Phase;
use super::report::{IterationOutcome, StopReason};

/// Bounded recent-iteration line kept in the status file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentIteration {
    pub item_id: String,
    pub outcome: IterationOutcome,
    pub duration_secs: f64,
}

/// The live, frequently-overwritten view of current execution.
///
/// Each write supersedes the last; there is no history here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressState {
    pub run_id: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub current_item_id: Option<String>,
    pub current_item_title: Option<String>,
    pub current_phase: Option<Phase>,
    pub phase_started_at: Option<DateTime<Utc>>,
    pub action_count: u32,
    pub last_action_at: Option<DateTime<Utc>>,
    pub last_verdict: Option<String>,
    pub completed: u32,
    pub remaining: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stop_reason: Option<StopReason>,
    pub recent: Vec<RecentIteration>,
}

impl ProgressState {
    /// Fresh progress state at loop start.
    #[must_use]
    pub fn new(run_id: impl Into<String>, max_iterations: u32) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            iteration: 0,
            max_iterations,
            current_item_id: None,
            current_item_title: None,
            current_phase: None,
            phase_started_at: None,
            action_count: 0,
            last_action_at: None,
            last_verdict: None,
            completed: 0,
            remaining: 0,
            started_at: now,
            updated_at: now,
            stop_reason: None,
            recent: Vec::new(),
        }
    }

    /// Begin tracking a new item.
    pub fn begin_item(&mut self, id: impl Into<String>, title: impl Into<String>) {
        self.current_item_id = Some(id.into());
        self.current_item_title = Some(title.into());
        self.current_phase = None;
        self.action_count = 0;
        self.touch();
    }

    /// Begin tracking a new phase of the current item.
    pub fn begin_phase(&mut self, phase: Phase) {
        self.current_phase = Some(phase);
        self.phase_started_at = Some(Utc::now());
        self.touch();
    }

    /// Record an observed worker action.
    pub fn record_action(&mut self) {
        self.action_count += 1;
        self.last_action_at = Some(Utc::now());
        self.touch();
    }

    /// Record a finished iteration, keeping the recent list bounded.
    pub fn finish_iteration(
        &mut self,
        item_id: impl Into<String>,
        outcome: IterationOutcome,
        duration_secs: f64,
        limit: usize,
    ) {
        if outcome.is_success() {
            self.completed += 1;
        }
        self.recent.push(RecentIteration {
            item_id: item_id.into(),
            outcome,
            duration_secs,
        });
        if self.recent.len() > limit {
            let drop = self.recent.len() - limit;
            self.recent.drain(..drop);
        }
        self.current_item_id = None;
        self.current_item_title = None;
        self.current_phase = None;
        self.phase_started_at = None;
        self.touch();
    }

    /// Update the last-write timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Best-effort sink for progress snapshots.
///
/// Implemented by the status-file writer; write failures are the sink's
/// problem (logged, never propagated into the loop).
pub trait StatusSink {
    fn update(&self, progress: &ProgressState);
}

/// Sink that discards updates.
#[derive(Debug, Default)]
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn update(&self, _progress: &ProgressState) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_item_resets_phase_state() {
        let mut progress = ProgressState::new("run-1", 10);
        progress.begin_item("item-1", "First");
        progress.begin_phase(Phase::Implement);
        progress.record_action();
        assert_eq!(progress.action_count, 1);

        progress.begin_item("item-2", "Second");
        assert_eq!(progress.action_count, 0);
        assert_eq!(progress.current_item_id.as_deref(), Some("item-2"));
        assert!(progress.current_phase.is_none());
    }

    #[test]
    fn test_finish_iteration_bounds_recent() {
        let mut progress = ProgressState::new("run-1", 10);
        for i in 0..15 {
            progress.finish_iteration(format!("item-{i}"), IterationOutcome::Completed, 1.0, 10);
        }
        assert_eq!(progress.recent.len(), 10);
        assert_eq!(progress.recent.first().unwrap().item_id, "item-5");
        assert_eq!(progress.completed, 15);
    }

    #[test]
    fn test_finish_iteration_counts_only_success() {
        let mut progress = ProgressState::new("run-1", 10);
        progress.finish_iteration("a", IterationOutcome::Completed, 1.0, 10);
        progress.finish_iteration("b", IterationOutcome::Blocked, 1.0, 10);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.recent.len(), 2);
    }
}
