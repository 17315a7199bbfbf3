//! Foreman - autonomous iteration controller.
//!
//! Foreman repeatedly drives an external worker process through a fixed
//! pipeline of phases (implement, review, finalize, optional accept) to
//! clear a queue of discrete work items, stopping safely on exhaustion,
//! repeated failure, or operator request.
//!
//! # Architecture
//!
//! The crate is organized into several modules, leaves first:
//!
//! - [`config`] - Named constants and runtime settings
//! - [`error`] - Custom error types and handling
//! - [`models`] - Records and small stateful types (breaker, skip list)
//! - [`parser`] - Signal extraction from the worker's output stream
//! - [`worker`] - Worker process invocation contract
//! - [`phase`] - Single-phase execution with timeouts and idle detection
//! - [`tracker`] - Work-item tracking subsystem boundary
//! - [`iteration`] - Per-item phase state machine with bounded retries
//! - [`r#loop`] - The top-level control loop and its persistence
//! - [`testing`] - Canned trackers and scripted workers for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use foreman::config::{LoopSettings, StatePaths};
//! use foreman::r#loop::{register_signal_handlers, LoopOrchestrator};
//! use foreman::tracker::ProcessTracker;
//!
//! let settings = LoopSettings::default().with_max_iterations(10);
//! let tracker = ProcessTracker::new(&settings.tracker_command)?;
//! let orchestrator = LoopOrchestrator::new(settings, StatePaths::new(".foreman"), Box::new(tracker))?;
//! register_signal_handlers(&orchestrator.shutdown_flag())?;
//! let report = orchestrator.run().await?;
//! println!("stopped: {}", report.stop_reason);
//! ```

pub mod config;
pub mod error;
pub mod iteration;
pub mod models;
pub mod parser;
pub mod phase;
pub mod testing;
pub mod tracker;
pub mod worker;

// Note: 'loop' is a reserved keyword, so we use r#loop
#[path = "loop/mod.rs"]
pub mod r#loop;

// Re-export commonly used types
pub use error::{ForemanError, Result};

pub use config::{IdlePolicy, LoopSettings, StatePaths};

pub use models::{
    ActionRecord, CircuitBreaker, IterationOutcome, IterationResult, LoopMetrics, LoopReport,
    Phase, PhaseResult, PhaseSignals, ProgressState, QueueSnapshot, ReviewIssue, ReviewResult,
    ReviewVerdict, SkipList, StopReason,
};

pub use iteration::IterationRunner;
pub use phase::PhaseRunner;
pub use r#loop::{LoopOrchestrator, ShutdownFlag};
pub use tracker::{ItemStatus, ProcessTracker, TrackedItem, Tracker};
pub use worker::WorkerCommand;
