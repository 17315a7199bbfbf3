//! Per-item iteration: the fixed phase sequence with bounded retries.
//!
//! IMPLEMENT → REVIEW → FINALIZE → (ACCEPT, conditional). Review rejections
//! restart the IMPLEMENT→REVIEW cycle with structured feedback until the
//! attempt budget runs out; execution faults map to iteration outcomes per
//! the error taxonomy rather than crashing the loop.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{
    LoopSettings, StatePaths, BACKOFF_BASE_SECS, BACKOFF_JITTER_FRACTION, BACKOFF_MAX_SECS,
    MAX_UNPARSEABLE_REVIEWS,
};
use crate::error::ForemanError;
use crate::models::{
    IntentSummary, IterationOutcome, IterationResult, Phase, PhaseResult, PhaseSummary,
    ProgressState, QueueSnapshot, ReviewIssue, ReviewResult, ReviewVerdict, StatusSink,
};
use crate::parser::{parse_intent_block, parse_issue_feedback, parse_review_result};
use crate::phase::PhaseRunner;
use crate::r#loop::ShutdownFlag;
use crate::tracker::{TrackedItem, Tracker};

/// Structured feedback handed to the next IMPLEMENT attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryContext {
    pub attempt: u32,
    pub issues: Vec<ReviewIssue>,
    pub written_at: chrono::DateTime<Utc>,
}

/// Unjittered exponential backoff delay for retry attempt `n` (1-based),
/// capped at `max_secs`.
#[must_use]
pub fn backoff_delay(attempt: u32, base_secs: u64, max_secs: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(32);
    let secs = base_secs.saturating_mul(1u64 << exp).min(max_secs);
    Duration::from_secs(secs)
}

/// Apply ±20% jitter to a backoff delay.
#[must_use]
pub fn with_jitter(delay: Duration, jitter_fraction: f64) -> Duration {
    let factor = rand::rng().random_range(1.0 - jitter_fraction..=1.0 + jitter_fraction);
    delay.mul_f64(factor)
}

/// Runs the full phase sequence for one work item.
pub struct IterationRunner {
    phases: PhaseRunner,
    settings: LoopSettings,
    paths: StatePaths,
}

impl IterationRunner {
    #[must_use]
    pub fn new(phases: PhaseRunner, settings: LoopSettings, paths: StatePaths) -> Self {
        Self {
            phases,
            settings,
            paths,
        }
    }

    /// Execute the phase state machine for `item` and summarize the pass.
    pub async fn run_iteration(
        &self,
        tracker: &dyn Tracker,
        item: &TrackedItem,
        shutdown: &ShutdownFlag,
        progress: &mut ProgressState,
        status: &dyn StatusSink,
    ) -> IterationResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let budget = self.settings.retry_attempts.max(1);

        let before = match tracker.capture_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("pre-iteration snapshot failed: {e}");
                QueueSnapshot::default()
            }
        };

        progress.begin_item(item.id.as_str(), item.title.as_str());
        status.update(progress);

        let mut phase_results: Vec<PhaseResult> = Vec::new();
        let mut attempt: u32 = 1;
        let mut unparseable_streak: u32 = 0;
        let outcome: IterationOutcome;

        'machine: loop {
            // IMPLEMENT. No intra-iteration retry of this phase on failure.
            let retry_ctx = (attempt > 1).then(|| self.paths.retry_context_file());
            let implement = self
                .phases
                .run_phase(
                    Phase::Implement,
                    &item.id,
                    retry_ctx.as_deref(),
                    progress,
                    status,
                )
                .await;
            let implement_ok = implement.success;
            let implement_timeout = implement
                .error
                .as_ref()
                .is_some_and(ForemanError::is_timeout);
            phase_results.push(implement);
            if !implement_ok {
                outcome = if implement_timeout {
                    IterationOutcome::TimedOut
                } else {
                    IterationOutcome::Blocked
                };
                break 'machine;
            }

            if shutdown.is_set() {
                info!("shutdown requested, abandoning iteration before review");
                outcome = IterationOutcome::SkippedTransient;
                break 'machine;
            }

            // REVIEW. Execution faults are transient and do not consume budget.
            let review = self
                .phases
                .run_phase(Phase::Review, &item.id, None, progress, status)
                .await;
            let review_ok = review.success;
            let parsed = parse_review_output(&review.output);
            phase_results.push(review);
            if !review_ok {
                outcome = IterationOutcome::SkippedTransient;
                break 'machine;
            }

            progress.last_verdict = Some(parsed.verdict.to_string());
            status.update(progress);

            match parsed.verdict {
                ReviewVerdict::Approved => {
                    let finalize = self
                        .phases
                        .run_phase(Phase::Finalize, &item.id, None, progress, status)
                        .await;
                    let finalize_ok = finalize.success;
                    phase_results.push(finalize);
                    if !finalize_ok {
                        // Partial finalization is unsafe to retry blindly.
                        outcome = IterationOutcome::Blocked;
                        break 'machine;
                    }
                    if let Some(accept) = self.maybe_accept(tracker, item, shutdown, progress, status).await {
                        phase_results.push(accept);
                    }
                    outcome = IterationOutcome::Completed;
                    break 'machine;
                }
                ReviewVerdict::Blocked => {
                    info!("review blocked item {}", item.id);
                    outcome = IterationOutcome::Blocked;
                    break 'machine;
                }
                ReviewVerdict::NeedsChanges | ReviewVerdict::Unparseable => {
                    if parsed.verdict == ReviewVerdict::Unparseable {
                        unparseable_streak += 1;
                        if unparseable_streak >= MAX_UNPARSEABLE_REVIEWS {
                            warn!(
                                "review verdict unparseable {unparseable_streak} times for {}, blocking",
                                item.id
                            );
                            outcome = IterationOutcome::Blocked;
                            break 'machine;
                        }
                    } else {
                        unparseable_streak = 0;
                    }

                    if attempt >= budget {
                        outcome = IterationOutcome::RetriesExhausted;
                        break 'machine;
                    }
                    if shutdown.is_set() {
                        info!("shutdown requested, not starting retry attempt");
                        outcome = IterationOutcome::SkippedTransient;
                        break 'machine;
                    }
                    if let Err(e) = self.write_retry_context(attempt + 1, parsed.issues.clone()) {
                        // Proceeding without rework context risks repeating
                        // the same mistake.
                        warn!("failed to write retry context: {e}");
                        outcome = IterationOutcome::Blocked;
                        break 'machine;
                    }

                    let delay = with_jitter(
                        backoff_delay(attempt, BACKOFF_BASE_SECS, BACKOFF_MAX_SECS),
                        BACKOFF_JITTER_FRACTION,
                    );
                    debug!(
                        "attempt {attempt} for {} rejected ({} blocking issues), retrying in {delay:?}",
                        item.id, parsed.blocking_issues
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }

        self.clear_retry_context();

        let after = match tracker.capture_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("post-iteration snapshot failed: {e}");
                before.clone()
            }
        };
        let diff = before.diff(&after);
        if let Some(acted) = diff.acted_item() {
            if acted != item.id {
                warn!(
                    "worker acted on {acted} instead of requested item {}",
                    item.id
                );
            }
        }

        let result = assemble_result(
            item,
            outcome,
            attempt,
            &phase_results,
            before,
            after,
            started_at,
            clock.elapsed(),
        );

        progress.finish_iteration(
            item.id.as_str(),
            outcome,
            result.total_duration_secs,
            crate::config::RECENT_SUMMARY_LIMIT,
        );
        status.update(progress);
        result
    }

    /// Run ACCEPT only when the item was the last open child of its
    /// parent. Tracker faults skip the phase; an ACCEPT failure is
    /// reported but does not revert the iteration outcome.
    async fn maybe_accept(
        &self,
        tracker: &dyn Tracker,
        item: &TrackedItem,
        shutdown: &ShutdownFlag,
        progress: &mut ProgressState,
        status: &dyn StatusSink,
    ) -> Option<PhaseResult> {
        let parent = item.parent.as_deref()?;
        if shutdown.is_set() {
            info!("shutdown requested, skipping accept phase");
            return None;
        }
        match tracker.is_last_open_child(parent, &item.id).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!("last-open-child query failed, skipping accept: {e}");
                return None;
            }
        }
        let accept = self
            .phases
            .run_phase(Phase::Accept, &item.id, None, progress, status)
            .await;
        if !accept.success {
            warn!(
                "accept phase failed for parent {parent}: {}",
                accept.error_text().unwrap_or_default()
            );
        }
        Some(accept)
    }

    fn write_retry_context(
        &self,
        attempt: u32,
        issues: Vec<ReviewIssue>,
    ) -> crate::error::Result<()> {
        let path = self.paths.retry_context_file();
        let context = RetryContext {
            attempt,
            issues,
            written_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&context)?;
        std::fs::write(&path, json)
            .map_err(|e| ForemanError::retry_context(path.clone(), e.to_string()))
    }

    /// Best-effort removal at iteration end.
    fn clear_retry_context(&self) {
        let path = self.paths.retry_context_file();
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("failed to clear retry context {}: {e}", path.display());
            }
        }
    }
}

/// Combine the verdict block and issue lines of a review output.
fn parse_review_output(output: &str) -> ReviewResult {
    let mut result = parse_review_result(output).unwrap_or_else(ReviewResult::unparseable);
    result.issues = parse_issue_feedback(output);
    result
}

#[allow(clippy::too_many_arguments)]
fn assemble_result(
    item: &TrackedItem,
    outcome: IterationOutcome,
    attempts: u32,
    phase_results: &[PhaseResult],
    before: QueueSnapshot,
    after: QueueSnapshot,
    started_at: chrono::DateTime<Utc>,
    elapsed: Duration,
) -> IterationResult {
    let phases = phase_results
        .iter()
        .map(|result| PhaseSummary {
            phase: result.phase,
            duration_secs: result.duration.as_secs_f64(),
            success: result.success,
            action_count: result.actions.len(),
            error: result.error_text(),
        })
        .collect();

    let mut actions_by_kind: BTreeMap<String, u32> = BTreeMap::new();
    for result in phase_results {
        for action in &result.actions {
            *actions_by_kind.entry(action.kind.clone()).or_insert(0) += 1;
        }
    }

    // The last intent block across the pass wins.
    let intent: Option<IntentSummary> = phase_results
        .iter()
        .filter_map(|result| parse_intent_block(&result.output))
        .last();

    IterationResult {
        item_id: item.id.clone(),
        item_title: item.title.clone(),
        outcome,
        attempts,
        phases,
        total_duration_secs: elapsed.as_secs_f64(),
        intent,
        actions_by_kind,
        before,
        after,
        started_at,
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_monotonic_and_capped() {
        let mut previous = Duration::ZERO;
        for attempt in 1..=12 {
            let delay = backoff_delay(attempt, 2, 60);
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay <= Duration::from_secs(60));
            previous = delay;
        }
        assert_eq!(backoff_delay(1, 2, 60), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, 2, 60), Duration::from_secs(4));
        assert_eq!(backoff_delay(3, 2, 60), Duration::from_secs(8));
        assert_eq!(backoff_delay(10, 2, 60), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_huge_attempt_does_not_overflow() {
        assert_eq!(backoff_delay(u32::MAX, 2, 60), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_within_band() {
        let base = Duration::from_secs(10);
        for _ in 0..200 {
            let jittered = with_jitter(base, 0.2);
            assert!(jittered >= Duration::from_secs(8), "{jittered:?} below band");
            assert!(jittered <= Duration::from_secs(12), "{jittered:?} above band");
        }
    }

    #[test]
    fn test_parse_review_output_attaches_issues() {
        let output = "```review\nverdict: needs-changes\nblocking_issues: 1\n```\nISSUE [major] a.rs:1 - broken\n";
        let parsed = parse_review_output(output);
        assert_eq!(parsed.verdict, ReviewVerdict::NeedsChanges);
        assert_eq!(parsed.issues.len(), 1);
    }

    #[test]
    fn test_parse_review_output_unparseable() {
        let parsed = parse_review_output("no verdict at all");
        assert_eq!(parsed.verdict, ReviewVerdict::Unparseable);
        assert!(parsed.continue_iteration);
    }
}
