//! Worker event stream decoding and action correlation.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use crate::config::MAX_ACTION_SUMMARY;
use crate::models::ActionRecord;

use super::clip;

/// One decoded line of the worker's structured event stream.
///
/// The stream is line-delimited JSON tagged by `type`; anything that does
/// not decode is surfaced as `Raw` so free text still reaches the fence
/// scanners.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Tool invocation observed.
    Action {
        id: String,
        name: String,
        #[serde(default)]
        input: String,
    },
    /// Result correlated to an earlier invocation by `id`.
    ActionResult {
        id: String,
        #[serde(default)]
        output: String,
        #[serde(default = "default_true")]
        success: bool,
    },
    /// Out-of-band signal, e.g. `work_complete`.
    Signal { name: String },
    /// Free text carrying fenced blocks and markers.
    Text { text: String },
    /// Line that was not a structured event.
    #[serde(skip)]
    Raw(String),
}

fn default_true() -> bool {
    true
}

impl WorkerEvent {
    /// Decode one stream line. Total: undecodable lines become `Raw`.
    #[must_use]
    pub fn decode(line: &str) -> WorkerEvent {
        let trimmed = line.trim();
        if trimmed.starts_with('{') {
            match serde_json::from_str::<WorkerEvent>(trimmed) {
                Ok(event) => return event,
                Err(e) => debug!("undecodable event line, treating as text: {e}"),
            }
        }
        WorkerEvent::Raw(line.to_string())
    }

    /// The human-readable text carried by this event, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            WorkerEvent::Text { text } => Some(text),
            WorkerEvent::Raw(line) => Some(line),
            _ => None,
        }
    }
}

/// Correlates invocation and result events into [`ActionRecord`]s.
///
/// Pending invocations are keyed by correlation id; eviction happens on
/// correlation or at phase end via [`ActionTracker::drain`], bounding
/// memory when a truncated stream leaves results unobserved.
#[derive(Debug, Default)]
pub struct ActionTracker {
    actions: Vec<ActionRecord>,
    pending: HashMap<String, usize>,
}

impl ActionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract zero or more newly observed invocations from one event.
    /// Returns how many new actions were recorded.
    pub fn extract_actions(&mut self, event: &WorkerEvent) -> usize {
        let WorkerEvent::Action { id, name, input } = event else {
            return 0;
        };
        if self.pending.contains_key(id) {
            debug!("duplicate action id {id}, keeping first");
            return 0;
        }
        let record = ActionRecord::new(id.clone(), name.clone(), clip(input, MAX_ACTION_SUMMARY));
        self.pending.insert(id.clone(), self.actions.len());
        self.actions.push(record);
        1
    }

    /// Fill in the output summary and success flag for a pending action.
    /// No-op when no invocation matches the id (logged, not fatal).
    pub fn correlate_result(&mut self, event: &WorkerEvent) {
        let WorkerEvent::ActionResult { id, output, success } = event else {
            return;
        };
        match self.pending.remove(id) {
            Some(index) => {
                self.actions[index].complete(clip(output, MAX_ACTION_SUMMARY), *success);
            }
            None => debug!("result for unknown action id {id}, dropping"),
        }
    }

    /// Number of actions observed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Take all actions, evicting any still-pending correlations.
    #[must_use]
    pub fn drain(&mut self) -> Vec<ActionRecord> {
        self.pending.clear();
        std::mem::take(&mut self.actions)
    }
}
