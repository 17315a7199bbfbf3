//! Extraction of structured signals from worker output.
//!
//! Everything here is total: malformed or partial input yields `None` or
//! an empty result, never an error that could abort a phase. The matching
//! grammar lives entirely in this module so it can be hardened or swapped
//! without touching the control flow that depends on it.

mod events;

pub use events::{ActionTracker, WorkerEvent};

use regex::Regex;

use crate::models::{IntentSummary, PhaseSignals, ReviewIssue, ReviewResult, ReviewVerdict};

/// Marker line equivalent to a `work_complete` signal event.
pub const WORK_COMPLETE_MARKER: &str = "WORK COMPLETE";

/// Scan one text line for signal markers and fence openers.
#[must_use]
pub fn scan_line_signals(line: &str) -> PhaseSignals {
    PhaseSignals {
        work_complete: line.trim() == WORK_COMPLETE_MARKER,
        verdict_seen: line.trim_start().starts_with("```review"),
        intent_seen: line.trim_start().starts_with("```intent"),
    }
}

/// Locate the final fenced review block and parse its verdict.
///
/// Returns `None` when no block is present or the verdict keyword is
/// missing/unknown; the caller treats that as "unparseable", not a crash.
#[must_use]
pub fn parse_review_result(text: &str) -> Option<ReviewResult> {
    let Ok(re) = Regex::new(r"(?s)```review\s*\n(.*?)```") else {
        return None;
    };
    // The last block governs; workers may restate earlier drafts.
    let body = re.captures_iter(text).last()?.get(1)?.as_str();

    let mut verdict = None;
    let mut continue_iteration = None;
    let mut blocking_issues = 0u32;

    for line in body.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "verdict" => {
                verdict = match value {
                    "approved" => Some(ReviewVerdict::Approved),
                    "needs-changes" => Some(ReviewVerdict::NeedsChanges),
                    "blocked" => Some(ReviewVerdict::Blocked),
                    _ => return None,
                };
            }
            "continue" => continue_iteration = value.parse::<bool>().ok(),
            "blocking_issues" => blocking_issues = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    let verdict = verdict?;
    let continue_iteration = continue_iteration.unwrap_or(match verdict {
        ReviewVerdict::Approved => false,
        _ => true,
    });

    Some(ReviewResult {
        verdict,
        continue_iteration,
        blocking_issues,
        issues: Vec::new(),
    })
}

/// Extract structured issue entries, in document order.
///
/// Grammar: `ISSUE [severity] location - problem | fix: suggestion`,
/// one entry per line; the `| fix:` tail is optional.
#[must_use]
pub fn parse_issue_feedback(text: &str) -> Vec<ReviewIssue> {
    let Ok(re) =
        Regex::new(r"(?m)^ISSUE\s*\[(\w+)\]\s+(\S+)\s+-\s+(.+?)(?:\s*\|\s*fix:\s*(.+))?\s*$")
    else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| {
            Some(ReviewIssue {
                severity: caps.get(1)?.as_str().to_string(),
                location: caps.get(2)?.as_str().to_string(),
                problem: caps.get(3)?.as_str().trim().to_string(),
                suggestion: caps.get(4).map(|m| m.as_str().trim().to_string()),
            })
        })
        .collect()
}

/// Extract the short why/before/after narrative for reporting.
///
/// Returns `None` when the block is absent or carries no `why:` line.
#[must_use]
pub fn parse_intent_block(text: &str) -> Option<IntentSummary> {
    let Ok(re) = Regex::new(r"(?s)```intent\s*\n(.*?)```") else {
        return None;
    };
    let body = re.captures_iter(text).last()?.get(1)?.as_str();

    let mut intent = None;
    let mut before = String::new();
    let mut after = String::new();

    for line in body.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "why" => intent = Some(value),
            "before" => before = value,
            "after" => after = value,
            _ => {}
        }
    }

    Some(IntentSummary {
        intent: intent?,
        before,
        after,
    })
}

/// Clip a summary string to `max` characters on a char boundary.
#[must_use]
pub fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max).collect();
    clipped.push('…');
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    const REVIEW_OUTPUT: &str = r#"Looked over the diff.

```review
verdict: needs-changes
continue: true
blocking_issues: 2
```

ISSUE [major] src/lib.rs:42 - missing bounds check | fix: clamp the index
ISSUE [minor] src/parser.rs:7 - dead import
"#;

    #[test]
    fn test_parse_review_needs_changes() {
        let result = parse_review_result(REVIEW_OUTPUT).unwrap();
        assert_eq!(result.verdict, ReviewVerdict::NeedsChanges);
        assert!(result.continue_iteration);
        assert_eq!(result.blocking_issues, 2);
    }

    #[test]
    fn test_parse_review_approved_defaults_no_continue() {
        let text = "```review\nverdict: approved\n```";
        let result = parse_review_result(text).unwrap();
        assert_eq!(result.verdict, ReviewVerdict::Approved);
        assert!(!result.continue_iteration);
        assert_eq!(result.blocking_issues, 0);
    }

    #[test]
    fn test_parse_review_absent_block() {
        assert!(parse_review_result("no block here").is_none());
        assert!(parse_review_result("").is_none());
    }

    #[test]
    fn test_parse_review_unknown_verdict() {
        let text = "```review\nverdict: maybe\n```";
        assert!(parse_review_result(text).is_none());
    }

    #[test]
    fn test_parse_review_last_block_wins() {
        let text = "```review\nverdict: needs-changes\n```\nrevised:\n```review\nverdict: approved\n```";
        let result = parse_review_result(text).unwrap();
        assert_eq!(result.verdict, ReviewVerdict::Approved);
    }

    #[test]
    fn test_parse_issues_in_document_order() {
        let issues = parse_issue_feedback(REVIEW_OUTPUT);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].severity, "major");
        assert_eq!(issues[0].location, "src/lib.rs:42");
        assert_eq!(issues[0].problem, "missing bounds check");
        assert_eq!(issues[0].suggestion.as_deref(), Some("clamp the index"));
        assert_eq!(issues[1].severity, "minor");
        assert!(issues[1].suggestion.is_none());
    }

    #[test]
    fn test_parse_issues_none_on_plain_text() {
        assert!(parse_issue_feedback("nothing structured here").is_empty());
    }

    #[test]
    fn test_parse_intent_block() {
        let text = "```intent\nwhy: close the auth gap\nbefore: unauthenticated reads allowed\nafter: reads require a session\n```";
        let summary = parse_intent_block(text).unwrap();
        assert_eq!(summary.intent, "close the auth gap");
        assert_eq!(summary.before, "unauthenticated reads allowed");
        assert_eq!(summary.after, "reads require a session");
    }

    #[test]
    fn test_parse_intent_requires_why() {
        let text = "```intent\nbefore: x\nafter: y\n```";
        assert!(parse_intent_block(text).is_none());
        assert!(parse_intent_block("").is_none());
    }

    #[test]
    fn test_scan_line_signals() {
        assert!(scan_line_signals("WORK COMPLETE").work_complete);
        assert!(scan_line_signals("  WORK COMPLETE  ").work_complete);
        assert!(!scan_line_signals("WORK COMPLETE soon").work_complete);
        assert!(scan_line_signals("```review").verdict_seen);
        assert!(scan_line_signals("```intent").intent_seen);
    }

    #[test]
    fn test_clip() {
        assert_eq!(clip("short", 10), "short");
        let clipped = clip("abcdefghij", 4);
        assert_eq!(clipped, "abcd…");
    }
}
