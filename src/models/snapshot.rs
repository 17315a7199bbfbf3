//! Work-item queue snapshots and diffing.

use serde::{Deserialize, Serialize};

/// Item identifiers partitioned by status, captured before and after an
/// iteration. Never mutated; a new snapshot replaces the old one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub ready: Vec<String>,
    pub in_progress: Vec<String>,
    pub closed: Vec<String>,
}

impl QueueSnapshot {
    #[must_use]
    pub fn new(ready: Vec<String>, in_progress: Vec<String>, closed: Vec<String>) -> Self {
        Self {
            ready,
            in_progress,
            closed,
        }
    }

    /// Diff against a later snapshot to infer what actually happened.
    ///
    /// The worker may act on a different item than the one nominally
    /// requested; the diff is how that is detected rather than assumed.
    #[must_use]
    pub fn diff(&self, after: &QueueSnapshot) -> SnapshotDiff {
        let left_ready = self
            .ready
            .iter()
            .filter(|id| !after.ready.contains(id))
            .cloned()
            .collect();
        let entered_in_progress = after
            .in_progress
            .iter()
            .filter(|id| !self.in_progress.contains(id))
            .cloned()
            .collect();
        let newly_closed = after
            .closed
            .iter()
            .filter(|id| !self.closed.contains(id))
            .cloned()
            .collect();
        SnapshotDiff {
            left_ready,
            entered_in_progress,
            newly_closed,
        }
    }
}

/// Status transitions observed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    /// Items that were ready before and are not ready after.
    pub left_ready: Vec<String>,
    /// Items newly in progress.
    pub entered_in_progress: Vec<String>,
    /// Items newly closed.
    pub newly_closed: Vec<String>,
}

impl SnapshotDiff {
    /// The item most plausibly acted upon: a newly closed item first,
    /// otherwise one that left the ready set.
    #[must_use]
    pub fn acted_item(&self) -> Option<&str> {
        self.newly_closed
            .first()
            .or_else(|| self.left_ready.first())
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left_ready.is_empty() && self.entered_in_progress.is_empty() && self.newly_closed.is_empty()
    }
}
