//! Per-item consecutive-failure tracking and permanent skips.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Failure state for one item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkipEntry {
    pub consecutive_failures: u32,
    pub skipped: bool,
}

/// Excludes chronically failing items from selection.
///
/// An item flagged as skipped is never re-selected until explicitly
/// cleared, even if the tracker still reports it as ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipList {
    max_failures: u32,
    entries: HashMap<String, SkipEntry>,
}

impl SkipList {
    #[must_use]
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures,
            entries: HashMap::new(),
        }
    }

    /// Record a failed iteration for an item. Returns true when this
    /// failure crossed the threshold and the item became skipped.
    pub fn record_failure(&mut self, id: &str) -> bool {
        let entry = self.entries.entry(id.to_string()).or_default();
        entry.consecutive_failures += 1;
        if !entry.skipped && entry.consecutive_failures >= self.max_failures {
            entry.skipped = true;
            return true;
        }
        false
    }

    /// Record a successful iteration, clearing the item's failure state.
    pub fn record_success(&mut self, id: &str) {
        self.entries.remove(id);
    }

    /// Whether an item is currently excluded from selection.
    #[must_use]
    pub fn is_skipped(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(|e| e.skipped)
    }

    /// Explicitly clear an item's skip state.
    pub fn clear(&mut self, id: &str) {
        self.entries.remove(id);
    }

    /// Current consecutive failure count for an item.
    #[must_use]
    pub fn failure_count(&self, id: &str) -> u32 {
        self.entries.get(id).map_or(0, |e| e.consecutive_failures)
    }

    /// Ids of all currently skipped items, sorted for determinism.
    #[must_use]
    pub fn skipped_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.skipped)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_after_max_failures() {
        let mut skip = SkipList::new(3);
        assert!(!skip.record_failure("item-1"));
        assert!(!skip.record_failure("item-1"));
        assert!(!skip.is_skipped("item-1"));

        assert!(skip.record_failure("item-1"));
        assert!(skip.is_skipped("item-1"));

        // Threshold crossing reported only once
        assert!(!skip.record_failure("item-1"));
        assert!(skip.is_skipped("item-1"));
    }

    #[test]
    fn test_success_resets_count() {
        let mut skip = SkipList::new(3);
        skip.record_failure("item-1");
        skip.record_failure("item-1");
        skip.record_success("item-1");
        assert_eq!(skip.failure_count("item-1"), 0);
        assert!(!skip.is_skipped("item-1"));
    }

    #[test]
    fn test_clear_unskips() {
        let mut skip = SkipList::new(1);
        skip.record_failure("item-1");
        assert!(skip.is_skipped("item-1"));

        skip.clear("item-1");
        assert!(!skip.is_skipped("item-1"));
        assert_eq!(skip.failure_count("item-1"), 0);
    }

    #[test]
    fn test_items_tracked_independently() {
        let mut skip = SkipList::new(2);
        skip.record_failure("a");
        skip.record_failure("b");
        skip.record_failure("b");
        assert!(!skip.is_skipped("a"));
        assert!(skip.is_skipped("b"));
        assert_eq!(skip.skipped_ids(), vec!["b".to_string()]);
    }
}
