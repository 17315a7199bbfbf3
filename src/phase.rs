//! Phase execution: spawn the worker, stream its output, enforce budgets.
//!
//! One phase is one bounded worker invocation. The controlling task
//! multiplexes the child's stdout with a poll tick so it can consume
//! output, watch the idle clock, and enforce the hard timeout without a
//! dedicated reader thread.

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tracing::{debug, warn};

use crate::config::{LoopSettings, IdlePolicy, MAX_CAPTURED_OUTPUT, OUTPUT_POLL_INTERVAL_MS};
use crate::error::ForemanError;
use crate::models::{Phase, PhaseResult, PhaseSignals, ProgressState, StatusSink};
use crate::parser::{scan_line_signals, ActionTracker, WorkerEvent};
use crate::worker::WorkerCommand;

/// Runs single phases of the worker pipeline.
pub struct PhaseRunner {
    worker: WorkerCommand,
    settings: LoopSettings,
}

impl PhaseRunner {
    #[must_use]
    pub fn new(worker: WorkerCommand, settings: LoopSettings) -> Self {
        Self { worker, settings }
    }

    /// Execute one phase for one item and collect its result.
    ///
    /// Success is true only if the process exited cleanly and no
    /// timeout or idle abort occurred; an explicit completion signal
    /// also counts as success even though the child is terminated early.
    pub async fn run_phase(
        &self,
        phase: Phase,
        item_id: &str,
        retry_context: Option<&Path>,
        progress: &mut ProgressState,
        status: &dyn StatusSink,
    ) -> PhaseResult {
        let started = Instant::now();
        let timeout = self.settings.phase_timeout(phase);
        let idle_threshold = Duration::from_secs(self.settings.idle_threshold_secs);
        let poll = Duration::from_millis(OUTPUT_POLL_INTERVAL_MS);

        progress.begin_phase(phase);
        status.update(progress);

        let mut output = OutputBuffer::new(MAX_CAPTURED_OUTPUT);
        let mut signals = PhaseSignals::default();
        let mut actions = ActionTracker::new();

        let mut child = match self.worker.build(phase, item_id, retry_context).spawn() {
            Ok(child) => child,
            Err(e) => {
                return PhaseResult {
                    phase,
                    output: String::new(),
                    signals,
                    actions: Vec::new(),
                    duration: started.elapsed(),
                    success: false,
                    error: Some(ForemanError::process(
                        phase.name(),
                        -1,
                        format!("spawn failed: {e}"),
                    )),
                };
            }
        };

        let stdout = child
            .stdout
            .take()
            .map(|out| BufReader::new(out).lines());

        let mut error: Option<ForemanError> = None;
        let mut completed_early = false;
        let mut idle_flagged = false;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut last_output = Instant::now();

        if let Some(mut lines) = stdout {
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                last_output = Instant::now();
                                let line_signals = self.consume_line(
                                    &line, &mut output, &mut actions, progress, status,
                                );
                                signals.merge(line_signals);
                                if signals.work_complete {
                                    debug!("phase {phase}: completion signal seen, terminating worker early");
                                    completed_early = true;
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!("phase {phase}: stdout read error: {e}");
                                break;
                            }
                        }
                    }
                    () = tokio::time::sleep_until(deadline) => {
                        error = Some(ForemanError::timeout(phase.name(), timeout.as_secs()));
                        break;
                    }
                    () = tokio::time::sleep(poll) => {
                        if !idle_flagged && last_output.elapsed() >= idle_threshold {
                            match self.settings.idle_policy {
                                IdlePolicy::Wait => {
                                    debug!("phase {phase}: idle past threshold, waiting per policy");
                                    idle_flagged = true;
                                }
                                IdlePolicy::Terminate => {
                                    error = Some(ForemanError::idle(
                                        phase.name(),
                                        self.settings.idle_threshold_secs,
                                    ));
                                    break;
                                }
                                IdlePolicy::Fail => {
                                    warn!("phase {phase}: idle past threshold, marking failed");
                                    error = Some(ForemanError::idle(
                                        phase.name(),
                                        self.settings.idle_threshold_secs,
                                    ));
                                    idle_flagged = true;
                                }
                            }
                        }
                    }
                }
            }
        }

        let exited_clean = self
            .settle_child(&mut child, phase, deadline, completed_early, &mut error)
            .await;

        let success = error.is_none() && (exited_clean || completed_early);
        PhaseResult {
            phase,
            output: output.render(),
            signals,
            actions: actions.drain(),
            duration: started.elapsed(),
            success,
            error,
        }
    }

    /// Feed one stream line through the parser, collecting text, signals,
    /// and actions. Decode faults never abort the phase.
    fn consume_line(
        &self,
        line: &str,
        output: &mut OutputBuffer,
        actions: &mut ActionTracker,
        progress: &mut ProgressState,
        status: &dyn StatusSink,
    ) -> PhaseSignals {
        let event = WorkerEvent::decode(line);
        let mut signals = PhaseSignals::default();

        if actions.extract_actions(&event) > 0 {
            progress.record_action();
            status.update(progress);
        }
        actions.correlate_result(&event);

        match &event {
            WorkerEvent::Signal { name } if name == "work_complete" => {
                signals.work_complete = true;
            }
            _ => {
                if let Some(text) = event.text() {
                    for text_line in text.lines() {
                        signals.merge(scan_line_signals(text_line));
                    }
                    output.push_line(text);
                }
            }
        }
        signals
    }

    /// Wait for the child to settle, killing it when the phase was cut
    /// short. Records a process fault on a dirty natural exit.
    async fn settle_child(
        &self,
        child: &mut Child,
        phase: Phase,
        deadline: tokio::time::Instant,
        completed_early: bool,
        error: &mut Option<ForemanError>,
    ) -> bool {
        let must_kill = completed_early || error.as_ref().is_some_and(ForemanError::is_timeout);
        if must_kill {
            if let Err(e) = child.start_kill() {
                debug!("phase {phase}: kill failed (already exited?): {e}");
            }
        }

        // Bounded wait: a reaped exit past the deadline is a timeout, not a hang.
        let grace = tokio::time::Instant::now() + Duration::from_secs(10);
        let wait_until = if must_kill { grace } else { deadline.max(grace) };
        match tokio::time::timeout_at(wait_until, child.wait()).await {
            Ok(Ok(exit)) => {
                if exit.success() {
                    true
                } else {
                    if !must_kill && error.is_none() {
                        let code = exit.code().unwrap_or(-1);
                        *error = Some(ForemanError::process(
                            phase.name(),
                            code,
                            "worker exited non-zero",
                        ));
                    }
                    false
                }
            }
            Ok(Err(e)) => {
                if error.is_none() {
                    *error = Some(ForemanError::process(phase.name(), -1, e.to_string()));
                }
                false
            }
            Err(_) => {
                let _ = child.start_kill();
                if error.is_none() {
                    *error = Some(ForemanError::timeout(
                        phase.name(),
                        self.settings.phase_timeout(phase).as_secs(),
                    ));
                }
                false
            }
        }
    }
}

/// Bounded output capture keeping the head and tail of a long stream.
struct OutputBuffer {
    limit: usize,
    head: String,
    head_chars: usize,
    tail: VecDeque<String>,
    tail_chars: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            head: String::new(),
            head_chars: 0,
            tail: VecDeque::new(),
            tail_chars: 0,
            truncated: false,
        }
    }

    fn push_line(&mut self, line: &str) {
        let half = self.limit / 2;
        let line_chars = line.chars().count() + 1;
        if !self.truncated && self.head_chars + line_chars <= half {
            self.head_chars += line_chars;
            self.head.push_str(line);
            self.head.push('\n');
            return;
        }
        self.truncated = true;
        self.tail.push_back(line.to_string());
        self.tail_chars += line_chars;
        while self.tail_chars > half {
            if let Some(dropped) = self.tail.pop_front() {
                self.tail_chars -= dropped.chars().count() + 1;
            } else {
                break;
            }
        }
    }

    fn render(&self) -> String {
        if !self.truncated {
            return self.head.clone();
        }
        let mut rendered = self.head.clone();
        rendered.push_str("\n…[output truncated]…\n\n");
        for line in &self.tail {
            rendered.push_str(line);
            rendered.push('\n');
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NullStatusSink;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable script that acts as the worker.
    fn scripted_worker(dir: &TempDir, body: &str) -> WorkerCommand {
        let path = dir.path().join("worker.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{body}").unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        WorkerCommand::new(&[path.to_string_lossy().to_string()]).unwrap()
    }

    fn fast_settings() -> LoopSettings {
        let mut settings = LoopSettings::default();
        settings.implement_timeout_secs = 5;
        settings.review_timeout_secs = 5;
        settings.idle_threshold_secs = 2;
        settings
    }

    async fn run(worker: WorkerCommand, settings: LoopSettings, phase: Phase) -> PhaseResult {
        let runner = PhaseRunner::new(worker, settings);
        let mut progress = ProgressState::new("test", 1);
        runner
            .run_phase(phase, "item-1", None, &mut progress, &NullStatusSink)
            .await
    }

    #[tokio::test]
    async fn test_clean_exit_succeeds() {
        let dir = TempDir::new().unwrap();
        let worker = scripted_worker(
            &dir,
            r#"echo '{"type":"text","text":"did the work"}'
exit 0"#,
        );
        let result = run(worker, fast_settings(), Phase::Implement).await;
        assert!(result.success, "error: {:?}", result.error);
        assert!(result.output.contains("did the work"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_process_fault() {
        let dir = TempDir::new().unwrap();
        let worker = scripted_worker(&dir, "echo failing; exit 3");
        let result = run(worker, fast_settings(), Phase::Implement).await;
        assert!(!result.success);
        assert!(matches!(
            result.error,
            Some(ForemanError::Process { exit_code: 3, .. })
        ));
        // Partial output is preserved
        assert!(result.output.contains("failing"));
    }

    #[tokio::test]
    async fn test_hard_timeout_kills_worker() {
        let dir = TempDir::new().unwrap();
        let worker = scripted_worker(
            &dir,
            r#"echo started
sleep 60"#,
        );
        let mut settings = fast_settings();
        settings.implement_timeout_secs = 1;
        settings.idle_threshold_secs = 30;
        let started = Instant::now();
        let result = run(worker, settings, Phase::Implement).await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(ForemanError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(20));
        assert!(result.output.contains("started"));
    }

    #[tokio::test]
    async fn test_idle_terminate_policy() {
        let dir = TempDir::new().unwrap();
        let worker = scripted_worker(
            &dir,
            r#"echo one line
sleep 60"#,
        );
        let mut settings = fast_settings();
        settings.idle_threshold_secs = 1;
        settings.implement_timeout_secs = 30;
        let started = Instant::now();
        let result = run(worker, settings, Phase::Implement).await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(ForemanError::Idle { .. })));
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_early_completion_signal() {
        let dir = TempDir::new().unwrap();
        let worker = scripted_worker(
            &dir,
            r#"echo '{"type":"signal","name":"work_complete"}'
sleep 60"#,
        );
        let mut settings = fast_settings();
        settings.implement_timeout_secs = 30;
        settings.idle_threshold_secs = 30;
        let started = Instant::now();
        let result = run(worker, settings, Phase::Implement).await;
        assert!(result.success, "error: {:?}", result.error);
        assert!(result.signals.work_complete);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_marker_line_counts_as_completion() {
        let dir = TempDir::new().unwrap();
        let worker = scripted_worker(
            &dir,
            r#"echo 'WORK COMPLETE'
sleep 60"#,
        );
        let mut settings = fast_settings();
        settings.implement_timeout_secs = 30;
        settings.idle_threshold_secs = 30;
        let result = run(worker, settings, Phase::Implement).await;
        assert!(result.success);
        assert!(result.signals.work_complete);
    }

    #[tokio::test]
    async fn test_actions_collected_and_correlated() {
        let dir = TempDir::new().unwrap();
        let worker = scripted_worker(
            &dir,
            r#"echo '{"type":"action","id":"tc_1","name":"edit_file","input":"src/lib.rs"}'
echo '{"type":"action_result","id":"tc_1","output":"edited","success":true}'
echo '{"type":"action","id":"tc_2","name":"run_command","input":"cargo test"}'
exit 0"#,
        );
        let result = run(worker, fast_settings(), Phase::Implement).await;
        assert!(result.success);
        assert_eq!(result.actions.len(), 2);
        assert_eq!(result.actions[0].output_summary.as_deref(), Some("edited"));
        assert!(!result.actions[1].is_complete());
    }

    #[tokio::test]
    async fn test_malformed_event_lines_do_not_abort() {
        let dir = TempDir::new().unwrap();
        let worker = scripted_worker(
            &dir,
            r#"echo '{"type":"action","broken'
echo 'plain text'
exit 0"#,
        );
        let result = run(worker, fast_settings(), Phase::Implement).await;
        assert!(result.success);
        assert!(result.output.contains("plain text"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_process_fault() {
        let worker =
            WorkerCommand::new(&["/nonexistent/worker/binary".to_string()]).unwrap();
        let result = run(worker, fast_settings(), Phase::Implement).await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(ForemanError::Process { .. })));
    }

    #[test]
    fn test_output_buffer_truncation() {
        let mut buffer = OutputBuffer::new(40);
        for i in 0..100 {
            buffer.push_line(&format!("line-{i:03}"));
        }
        let rendered = buffer.render();
        assert!(rendered.contains("line-000"));
        assert!(rendered.contains("line-099"));
        assert!(rendered.contains("truncated"));
        assert!(!rendered.contains("line-050"));
    }

    #[test]
    fn test_output_buffer_no_truncation_under_limit() {
        let mut buffer = OutputBuffer::new(1000);
        buffer.push_line("hello");
        buffer.push_line("world");
        assert_eq!(buffer.render(), "hello\nworld\n");
    }
}
