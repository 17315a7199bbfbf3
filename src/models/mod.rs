//! Structured records and small stateful types for the iteration loop.
//!
//! Everything here is either an immutable record (snapshots, results,
//! reports) or a small single-owner stateful type (circuit breaker, skip
//! list). Nothing in this module performs IO.

mod breaker;
mod phase;
mod progress;
mod report;
mod review;
mod skip;
mod snapshot;

pub use breaker::CircuitBreaker;
pub use phase::{ActionRecord, Phase, PhaseResult, PhaseSignals};
pub use progress::{NullStatusSink, ProgressState, RecentIteration, StatusSink};
pub use report::{
    IterationOutcome, IterationResult, LoopMetrics, LoopReport, PhaseSummary, StopReason,
};
pub use review::{IntentSummary, ReviewIssue, ReviewResult, ReviewVerdict};
pub use skip::{SkipEntry, SkipList};
pub use snapshot::{QueueSnapshot, SnapshotDiff};
