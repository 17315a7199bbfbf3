//! Parsed review-phase verdicts and structured issue feedback.

use serde::{Deserialize, Serialize};

/// Enumerated verdict from the review phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewVerdict {
    Approved,
    NeedsChanges,
    Blocked,
    /// No recognizable verdict block in the output.
    Unparseable,
}

impl std::fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewVerdict::Approved => write!(f, "approved"),
            ReviewVerdict::NeedsChanges => write!(f, "needs-changes"),
            ReviewVerdict::Blocked => write!(f, "blocked"),
            ReviewVerdict::Unparseable => write!(f, "unparseable"),
        }
    }
}

/// One structured issue entry from review feedback.
///
/// Used to seed the retry context handed to the next IMPLEMENT attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: String,
    pub location: String,
    pub problem: String,
    pub suggestion: Option<String>,
}

/// Parsed result of the review phase. Derived once per review invocation;
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub verdict: ReviewVerdict,
    /// Whether the worker asked for the cycle to continue.
    pub continue_iteration: bool,
    /// Count of blocking issues reported in the verdict block.
    pub blocking_issues: u32,
    /// Structured issues, in document order.
    pub issues: Vec<ReviewIssue>,
}

impl ReviewResult {
    /// An unparseable placeholder result.
    #[must_use]
    pub fn unparseable() -> Self {
        Self {
            verdict: ReviewVerdict::Unparseable,
            continue_iteration: true,
            blocking_issues: 0,
            issues: Vec::new(),
        }
    }
}

/// Short why/before/after narrative extracted for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentSummary {
    pub intent: String,
    pub before: String,
    pub after: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_display() {
        assert_eq!(ReviewVerdict::Approved.to_string(), "approved");
        assert_eq!(ReviewVerdict::NeedsChanges.to_string(), "needs-changes");
        assert_eq!(ReviewVerdict::Unparseable.to_string(), "unparseable");
    }

    #[test]
    fn test_verdict_serde_kebab_case() {
        let json = serde_json::to_string(&ReviewVerdict::NeedsChanges).unwrap();
        assert_eq!(json, "\"needs-changes\"");
    }

    #[test]
    fn test_unparseable_defaults_to_continue() {
        let result = ReviewResult::unparseable();
        assert_eq!(result.verdict, ReviewVerdict::Unparseable);
        assert!(result.continue_iteration);
        assert_eq!(result.blocking_issues, 0);
    }
}
