//! Foreman - autonomous iteration controller.
//!
//! Drives an external worker process through phased work-item pipelines
//! until the queue is clear or a stop condition fires.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use foreman::config::{IdlePolicy, LoopSettings, StatePaths};
use foreman::models::{LoopReport, ProgressState, StopReason};
use foreman::r#loop::{register_signal_handlers, LoopOrchestrator};
use foreman::tracker::ProcessTracker;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(version = "0.1.0")]
#[command(about = "Autonomous iteration controller for phased work-item pipelines", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// State directory (defaults to .foreman in the current directory)
    #[arg(short, long, global = true)]
    state_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the iteration loop until the queue is clear
    Run {
        /// Maximum iterations
        #[arg(short, long, default_value = "50")]
        max_iterations: u32,

        /// Retry attempts per item after a needs-changes verdict
        #[arg(short, long, default_value = "3")]
        retry_attempts: u32,

        /// Implement-phase timeout in seconds
        #[arg(long, value_name = "SECS")]
        implement_timeout: Option<u64>,

        /// Review-phase timeout in seconds
        #[arg(long, value_name = "SECS")]
        review_timeout: Option<u64>,

        /// Finalize-phase timeout in seconds
        #[arg(long, value_name = "SECS")]
        finalize_timeout: Option<u64>,

        /// Accept-phase timeout in seconds
        #[arg(long, value_name = "SECS")]
        accept_timeout: Option<u64>,

        /// Seconds of worker silence before the idle policy applies
        #[arg(long, value_name = "SECS")]
        idle_threshold: Option<u64>,

        /// Idle policy: wait, terminate, or fail
        #[arg(long, value_enum, default_value = "terminate")]
        idle_policy: IdlePolicy,

        /// Worker command (program plus arguments)
        #[arg(long, value_name = "CMD", num_args = 1.., default_values_t = [String::from("claude")])]
        worker: Vec<String>,

        /// Tracker command (program plus arguments)
        #[arg(long, value_name = "CMD", num_args = 1.., default_values_t = [String::from("tracker")])]
        tracker: Vec<String>,

        /// Write logs to a file instead of stderr
        #[arg(long, value_name = "PATH")]
        log_file: Option<PathBuf>,
    },

    /// Show the live status of a running or finished loop
    Status,

    /// Show the final report of the last run
    Report,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let state_dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(foreman::config::STATE_DIR));
    let paths = StatePaths::new(state_dir);

    match cli.command {
        Commands::Run {
            max_iterations,
            retry_attempts,
            implement_timeout,
            review_timeout,
            finalize_timeout,
            accept_timeout,
            idle_threshold,
            idle_policy,
            worker,
            tracker,
            log_file,
        } => {
            init_tracing(cli.verbose, log_file.as_ref())?;

            let mut settings = LoopSettings::default()
                .with_max_iterations(max_iterations)
                .with_retry_attempts(retry_attempts)
                .with_worker_command(worker)
                .with_tracker_command(tracker);
            if let Some(secs) = implement_timeout {
                settings.implement_timeout_secs = secs;
            }
            if let Some(secs) = review_timeout {
                settings.review_timeout_secs = secs;
            }
            if let Some(secs) = finalize_timeout {
                settings.finalize_timeout_secs = secs;
            }
            if let Some(secs) = accept_timeout {
                settings.accept_timeout_secs = secs;
            }
            if let Some(secs) = idle_threshold {
                settings.idle_threshold_secs = secs;
            }
            settings.idle_policy = idle_policy;

            let tracker = ProcessTracker::new(&settings.tracker_command)?;
            let orchestrator = match LoopOrchestrator::new(settings, paths, Box::new(tracker)) {
                Ok(orchestrator) => orchestrator,
                Err(e) => {
                    eprintln!("{} {e}", "Error:".red().bold());
                    std::process::exit(e.exit_code());
                }
            };
            register_signal_handlers(&orchestrator.shutdown_flag())?;

            let report = orchestrator.run().await?;
            print_report(&report);
            std::process::exit(stop_exit_code(report.stop_reason));
        }

        Commands::Status => {
            let contents = std::fs::read_to_string(paths.status_file())?;
            let progress: ProgressState = serde_json::from_str(&contents)?;
            print_status(&progress);
        }

        Commands::Report => {
            let contents = std::fs::read_to_string(paths.report_file())?;
            let report: LoopReport = serde_json::from_str(&contents)?;
            print_report(&report);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = if verbose {
        "foreman=debug,info"
    } else {
        "foreman=info,warn"
    };

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
        }
    }
    Ok(())
}

fn stop_exit_code(reason: StopReason) -> i32 {
    match reason {
        StopReason::Exhausted | StopReason::IterationLimit => 0,
        StopReason::ShutdownRequested => 0,
        StopReason::CircuitBreakerOpen => 3,
        StopReason::Escalation => 4,
    }
}

fn print_status(progress: &ProgressState) {
    println!(
        "{} iteration {}/{}",
        "Foreman".bold(),
        progress.iteration,
        progress.max_iterations
    );
    if let (Some(id), Some(title)) = (&progress.current_item_id, &progress.current_item_title) {
        println!("  working on: {} ({title})", id.cyan());
    }
    if let Some(phase) = progress.current_phase {
        println!(
            "  phase: {} ({} actions)",
            phase.to_string().yellow(),
            progress.action_count
        );
    }
    if let Some(verdict) = &progress.last_verdict {
        println!("  last verdict: {verdict}");
    }
    println!(
        "  completed: {}, remaining: {}",
        progress.completed.to_string().green(),
        progress.remaining
    );
    if let Some(reason) = progress.stop_reason {
        println!("  stopped: {}", reason.to_string().red());
    }
    println!("  updated: {}", progress.updated_at);
}

fn print_report(report: &LoopReport) {
    let reason = report.stop_reason.to_string();
    let reason = match report.stop_reason {
        StopReason::Exhausted => reason.green(),
        StopReason::IterationLimit | StopReason::ShutdownRequested => reason.yellow(),
        StopReason::CircuitBreakerOpen | StopReason::Escalation => reason.red(),
    };
    println!(
        "{} run {} finished: {} after {} iteration(s)",
        "Foreman".bold(),
        report.run_id,
        reason.bold(),
        report.iterations
    );
    println!(
        "  success rate: {:.0}%, timeouts: {:.0}%, retries: {:.0}%",
        report.metrics.success_rate * 100.0,
        report.metrics.timeout_rate * 100.0,
        report.metrics.retry_rate * 100.0
    );
    println!(
        "  duration p50: {:.1}s, p90: {:.1}s, total actions: {}",
        report.metrics.duration_p50_secs,
        report.metrics.duration_p90_secs,
        report.metrics.total_actions
    );
    for result in &report.results {
        let outcome = result.outcome.to_string();
        let outcome = if result.outcome.is_success() {
            outcome.green()
        } else {
            outcome.red()
        };
        println!(
            "  - {} ({}): {} in {:.1}s, {} attempt(s)",
            result.item_id.cyan(),
            result.item_title,
            outcome,
            result.total_duration_secs,
            result.attempts
        );
    }
}
