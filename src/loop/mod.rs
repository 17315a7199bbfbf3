//! The top-level control loop.
//!
//! One orchestrator instance owns all mutable loop state (circuit
//! breaker, skip list, progress) for one run; nothing here is a
//! process-wide singleton, so multiple runs can execute side by side in
//! tests without shared state.

pub mod persistence;
pub mod signals;

pub use persistence::{atomic_write, HistoryRecord, HistoryWriter, PidFile, StatusFile};
pub use signals::{register_signal_handlers, ShutdownFlag};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{
    LoopSettings, StatePaths, MAX_SELECTION_FAULTS, RECENT_SUMMARY_LIMIT,
    SELECTION_RETRY_DELAY_SECS,
};
use crate::error::Result;
use crate::iteration::IterationRunner;
use crate::models::{
    CircuitBreaker, IterationResult, LoopMetrics, LoopReport, ProgressState, SkipList, StatusSink,
    StopReason,
};
use crate::phase::PhaseRunner;
use crate::tracker::{TrackedItem, Tracker};
use crate::worker::WorkerCommand;

/// Drives iterations until the queue is clear or a stop condition fires.
pub struct LoopOrchestrator {
    settings: LoopSettings,
    paths: StatePaths,
    tracker: Box<dyn Tracker>,
    iterations: IterationRunner,
    breaker: CircuitBreaker,
    skip: SkipList,
    progress: ProgressState,
    shutdown: ShutdownFlag,
    run_id: String,
    started_at: DateTime<Utc>,
    results: Vec<IterationResult>,
}

impl LoopOrchestrator {
    /// Build an orchestrator for one run. Validates settings, prepares
    /// the state directory, and verifies the worker binary exists.
    pub fn new(
        settings: LoopSettings,
        paths: StatePaths,
        tracker: Box<dyn Tracker>,
    ) -> Result<Self> {
        settings.validate()?;
        paths.ensure()?;

        let worker = WorkerCommand::new(&settings.worker_command)?;
        worker.preflight()?;

        let run_id = Uuid::new_v4().to_string();
        let iterations =
            IterationRunner::new(PhaseRunner::new(worker, settings.clone()), settings.clone(), paths.clone());

        Ok(Self {
            breaker: CircuitBreaker::new(settings.breaker_window, settings.breaker_threshold),
            skip: SkipList::new(settings.skip_after_failures),
            progress: ProgressState::new(run_id.clone(), settings.max_iterations),
            iterations,
            settings,
            paths,
            tracker,
            shutdown: ShutdownFlag::new(),
            run_id,
            started_at: Utc::now(),
            results: Vec::new(),
        })
    }

    /// Shared shutdown flag for wiring to signal handlers.
    #[must_use]
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Run the loop to completion and return the final report.
    ///
    /// The loop always terminates with an explicit stop reason; it never
    /// exits silently. Abnormal stops also leave an escalation report.
    pub async fn run(mut self) -> Result<LoopReport> {
        let _pid = match PidFile::write(self.paths.pid_file()) {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("failed to write pid file (continuing): {e}");
                None
            }
        };
        let status = StatusFile::new(self.paths.status_file());
        let history = HistoryWriter::new(self.paths.history_file());

        // Initial sync is best-effort; stale local state beats not starting.
        if let Err(e) = self.tracker.sync().await {
            warn!("initial tracker sync failed, proceeding: {e}");
        }

        let mut iteration: u32 = 0;
        let mut selection_faults: u32 = 0;
        let stop_reason = loop {
            if self.shutdown.is_set() {
                break StopReason::ShutdownRequested;
            }
            if iteration >= self.settings.max_iterations {
                break StopReason::IterationLimit;
            }
            if self.breaker.is_open() {
                self.write_escalation("circuit breaker open");
                break StopReason::CircuitBreakerOpen;
            }

            let ready = match self.tracker.list_ready().await {
                Ok(items) => {
                    selection_faults = 0;
                    items
                }
                Err(e) => {
                    // Conservative: treat as "no ready items this cycle".
                    selection_faults += 1;
                    warn!("ready-item query failed ({selection_faults}/{MAX_SELECTION_FAULTS}): {e}");
                    if selection_faults >= MAX_SELECTION_FAULTS {
                        self.write_escalation("tracking subsystem unreachable");
                        break StopReason::Escalation;
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(SELECTION_RETRY_DELAY_SECS))
                        .await;
                    continue;
                }
            };

            let candidates: Vec<TrackedItem> = ready
                .into_iter()
                .filter(|item| !self.skip.is_skipped(&item.id))
                .collect();
            let Some(item) = select_item(&candidates) else {
                break StopReason::Exhausted;
            };
            let item = item.clone();

            iteration += 1;
            self.progress.iteration = iteration;
            self.progress.remaining = candidates.len() as u32;
            status.update(&self.progress);

            info!(
                "iteration {iteration}/{}: item {} ({})",
                self.settings.max_iterations, item.id, item.title
            );
            let result = self
                .iterations
                .run_iteration(
                    self.tracker.as_ref(),
                    &item,
                    &self.shutdown,
                    &mut self.progress,
                    &status,
                )
                .await;

            self.record_outcome(&item.id, &result);
            if let Err(e) = history.append(&HistoryRecord::Iteration(Box::new(result.clone()))) {
                warn!("history append failed (continuing): {e}");
            }
            self.results.push(result);
            status.update(&self.progress);
        };

        info!("loop stopping: {stop_reason}");
        self.finish(stop_reason, iteration, &status, &history)
    }

    /// Feed one iteration outcome into the breaker and skip list.
    fn record_outcome(&mut self, item_id: &str, result: &IterationResult) {
        let success = result.outcome.is_success();
        self.breaker.record(success);
        if success {
            self.skip.record_success(item_id);
        } else if !result.outcome.is_transient() && self.skip.record_failure(item_id) {
            warn!(
                "item {item_id} failed {} consecutive times, skipping until cleared",
                self.skip.failure_count(item_id)
            );
        }
    }

    /// Write the final report, the terminal history record, and the last
    /// status snapshot.
    fn finish(
        mut self,
        stop_reason: StopReason,
        iterations: u32,
        status: &StatusFile,
        history: &HistoryWriter,
    ) -> Result<LoopReport> {
        let finished_at = Utc::now();
        let metrics = LoopMetrics::from_results(&self.results);
        let total_actions = metrics.total_actions;
        let report = LoopReport {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            finished_at,
            iterations,
            stop_reason,
            results: std::mem::take(&mut self.results),
            metrics,
        };

        if let Err(e) = persistence::write_report(&self.paths.report_file(), &report) {
            warn!("report write failed: {e}");
        }
        if let Err(e) = history.append(&HistoryRecord::LoopSummary {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            finished_at,
            iterations,
            total_actions,
            stop_reason,
        }) {
            warn!("history summary append failed: {e}");
        }

        self.progress.stop_reason = Some(stop_reason);
        self.progress.touch();
        status.update(&self.progress);

        Ok(report)
    }

    /// Human-readable summary of the failure pattern across the recent
    /// window, written when the loop halts abnormally.
    fn write_escalation(&self, cause: &str) {
        let mut body = String::new();
        body.push_str("# Foreman escalation\n\n");
        body.push_str(&format!("Run `{}` halted: {cause}.\n\n", self.run_id));
        body.push_str(&format!(
            "Consecutive failures: {} (threshold {}).\n\n",
            self.breaker.consecutive_failures(),
            self.breaker.threshold()
        ));

        let recent_failures: Vec<&IterationResult> = self
            .results
            .iter()
            .rev()
            .filter(|r| !r.outcome.is_success())
            .take(RECENT_SUMMARY_LIMIT)
            .collect();
        if recent_failures.is_empty() {
            body.push_str("No failed iterations recorded.\n");
        } else {
            body.push_str("## Recent failures\n\n");
            for result in recent_failures.iter().rev() {
                let errors: Vec<String> = result
                    .phases
                    .iter()
                    .filter_map(|p| p.error.as_ref().map(|e| format!("{}: {e}", p.phase)))
                    .collect();
                body.push_str(&format!(
                    "- `{}` ({}): {} after {} attempt(s){}\n",
                    result.item_id,
                    result.item_title,
                    result.outcome,
                    result.attempts,
                    if errors.is_empty() {
                        String::new()
                    } else {
                        format!("; {}", errors.join("; "))
                    }
                ));
            }
        }

        if let Err(e) = atomic_write(&self.paths.escalation_file(), body.as_bytes()) {
            warn!("escalation report write failed: {e}");
        }
    }
}

/// Deterministic selection: highest priority first, then creation order,
/// then id.
fn select_item(candidates: &[TrackedItem]) -> Option<&TrackedItem> {
    candidates.iter().min_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_ord.cmp(&b.created_ord))
            .then(a.id.cmp(&b.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::ItemStatus;

    fn item(id: &str, priority: i64, created_ord: u64) -> TrackedItem {
        TrackedItem {
            id: id.into(),
            title: format!("Item {id}"),
            status: ItemStatus::Ready,
            parent: None,
            priority,
            created_ord,
        }
    }

    #[test]
    fn test_select_highest_priority() {
        let candidates = vec![item("a", 1, 1), item("b", 5, 2), item("c", 3, 3)];
        assert_eq!(select_item(&candidates).unwrap().id, "b");
    }

    #[test]
    fn test_select_ties_break_on_creation_order() {
        let candidates = vec![item("late", 2, 9), item("early", 2, 1)];
        assert_eq!(select_item(&candidates).unwrap().id, "early");
    }

    #[test]
    fn test_select_fully_deterministic() {
        let candidates = vec![item("b", 2, 1), item("a", 2, 1)];
        assert_eq!(select_item(&candidates).unwrap().id, "a");
    }

    #[test]
    fn test_select_empty() {
        assert!(select_item(&[]).is_none());
    }
}
