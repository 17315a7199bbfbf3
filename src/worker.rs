//! Worker process invocation contract.
//!
//! The worker is an opaque program invoked once per phase with a phase
//! identifier and item identifier; retries also receive the retry-context
//! file path. Foreman only speaks to it through argv and stdout.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{ForemanError, Result};
use crate::models::Phase;

/// Builds the argv for one worker invocation.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: String,
    base_args: Vec<String>,
}

impl WorkerCommand {
    /// Create from a command vector: program followed by base arguments.
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, base_args) = command.split_first().ok_or_else(|| {
            ForemanError::config("worker command must name a program")
        })?;
        Ok(Self {
            program: program.clone(),
            base_args: base_args.to_vec(),
        })
    }

    /// The program name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Verify the worker binary is invocable before the loop starts.
    pub fn preflight(&self) -> Result<()> {
        if self.program.contains(std::path::MAIN_SEPARATOR) {
            if Path::new(&self.program).exists() {
                return Ok(());
            }
        } else if which::which(&self.program).is_ok() {
            return Ok(());
        }
        Err(ForemanError::MissingWorker {
            program: self.program.clone(),
        })
    }

    /// Build the command for one phase of one item.
    ///
    /// Stdout is piped for streaming; stderr passes through to the
    /// controlling terminal/log.
    #[must_use]
    pub fn build(&self, phase: Phase, item_id: &str, retry_context: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("--phase")
            .arg(phase.name())
            .arg("--task")
            .arg(item_id);
        if let Some(path) = retry_context {
            cmd.arg("--retry-context").arg(path);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}
