//! Phase identifiers and per-phase execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ForemanError;

/// One stage of the per-item pipeline.
///
/// Phases run in a fixed order; ACCEPT is conditional on the item being
/// the last open child of its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Implement,
    Review,
    Finalize,
    Accept,
}

impl Phase {
    /// All phases in pipeline order.
    pub const ALL: [Phase; 4] = [Phase::Implement, Phase::Review, Phase::Finalize, Phase::Accept];

    /// Stable lowercase name used in CLI args, logs, and persisted records.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Implement => "implement",
            Phase::Review => "review",
            Phase::Finalize => "finalize",
            Phase::Accept => "accept",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One observed tool invocation by the worker process.
///
/// Created from an `action` event; output fields are attached later when
/// the matching `action_result` event arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Correlation id shared between the invocation and result events.
    pub id: String,
    /// Tool kind/name as reported by the worker.
    pub kind: String,
    /// Clipped summary of the invocation input.
    pub input_summary: String,
    /// Clipped summary of the result output, once observed.
    pub output_summary: Option<String>,
    /// Whether the tool invocation succeeded, once observed.
    pub success: Option<bool>,
    /// When the invocation was observed.
    pub observed_at: DateTime<Utc>,
}

impl ActionRecord {
    /// Record a newly observed invocation.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>, input_summary: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            input_summary: input_summary.into(),
            output_summary: None,
            success: None,
            observed_at: Utc::now(),
        }
    }

    /// Attach the correlated result fields.
    pub fn complete(&mut self, output_summary: impl Into<String>, success: bool) {
        self.output_summary = Some(output_summary.into());
        self.success = Some(success);
    }

    /// Whether a result event has been correlated yet.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.success.is_some()
    }
}

/// Signal flags detected while streaming a phase's output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSignals {
    /// Explicit "work complete" marker seen.
    pub work_complete: bool,
    /// A review verdict block was present.
    pub verdict_seen: bool,
    /// An intent/before/after block was present.
    pub intent_seen: bool,
}

impl PhaseSignals {
    /// Merge flags observed on a single line into the running set.
    pub fn merge(&mut self, other: PhaseSignals) {
        self.work_complete |= other.work_complete;
        self.verdict_seen |= other.verdict_seen;
        self.intent_seen |= other.intent_seen;
    }
}

/// Outcome of one phase execution.
///
/// Owned by the iteration controller and discarded after the iteration;
/// only derived summaries persist.
#[derive(Debug)]
pub struct PhaseResult {
    /// Which phase ran.
    pub phase: Phase,
    /// Captured output, truncated to the configured bound.
    pub output: String,
    /// Signal flags detected during streaming.
    pub signals: PhaseSignals,
    /// Tool invocations observed, in stream order.
    pub actions: Vec<ActionRecord>,
    /// Wall-clock duration of the phase.
    pub duration: Duration,
    /// True only if the process exited cleanly and no timeout/idle abort occurred.
    pub success: bool,
    /// The failure, when `success` is false.
    pub error: Option<ForemanError>,
}

impl PhaseResult {
    /// Short error description for summaries, empty when successful.
    #[must_use]
    pub fn error_text(&self) -> Option<String> {
        self.error.as_ref().map(std::string::ToString::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::Implement.name(), "implement");
        assert_eq!(Phase::Accept.to_string(), "accept");
        assert_eq!(Phase::ALL.len(), 4);
    }

    #[test]
    fn test_action_record_lifecycle() {
        let mut action = ActionRecord::new("tc_1", "edit_file", "src/lib.rs");
        assert!(!action.is_complete());
        assert!(action.output_summary.is_none());

        action.complete("ok", true);
        assert!(action.is_complete());
        assert_eq!(action.success, Some(true));
        assert_eq!(action.output_summary.as_deref(), Some("ok"));
    }

    #[test]
    fn test_signals_merge() {
        let mut signals = PhaseSignals::default();
        signals.merge(PhaseSignals {
            work_complete: true,
            ..Default::default()
        });
        signals.merge(PhaseSignals {
            verdict_seen: true,
            ..Default::default()
        });
        assert!(signals.work_complete);
        assert!(signals.verdict_seen);
        assert!(!signals.intent_seen);
    }

    #[test]
    fn test_phase_serde_roundtrip() {
        let json = serde_json::to_string(&Phase::Review).unwrap();
        assert_eq!(json, "\"review\"");
        let phase: Phase = serde_json::from_str("\"finalize\"").unwrap();
        assert_eq!(phase, Phase::Finalize);
    }
}
