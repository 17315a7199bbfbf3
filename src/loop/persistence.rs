//! Atomic file persistence for status, history, and reports.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::models::{IterationResult, LoopReport, ProgressState, StatusSink, StopReason};

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Write `contents` to `path` atomically: write a temporary sibling,
/// flush it to disk, then rename over the target. A concurrent reader
/// never observes a partially written file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = tmp_path_for(path);
    let mut tmp_file = File::create(&tmp_path)?;
    tmp_file.write_all(contents)?;
    tmp_file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

/// Status-file writer. Every update atomically replaces the whole file;
/// write failures are logged, never propagated into the loop.
#[derive(Debug)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write(&self, progress: &ProgressState) -> Result<()> {
        let json = serde_json::to_vec_pretty(progress)?;
        atomic_write(&self.path, &json)
    }
}

impl StatusSink for StatusFile {
    fn update(&self, progress: &ProgressState) {
        if let Err(e) = self.write(progress) {
            warn!("status write failed (continuing): {e}");
        }
    }
}

/// One line of the append-only history file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryRecord {
    Iteration(Box<IterationResult>),
    LoopSummary {
        run_id: String,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        iterations: u32,
        total_actions: u32,
        stop_reason: StopReason,
    },
}

/// Append-only JSONL history writer.
#[derive(Debug)]
pub struct HistoryWriter {
    path: PathBuf,
}

impl HistoryWriter {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one record as a single line.
    pub fn append(&self, record: &HistoryRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Read all records back (used by `foreman report` and tests).
    pub fn read_all(&self) -> Result<Vec<HistoryRecord>> {
        let contents = fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping malformed history line: {e}"),
            }
        }
        Ok(records)
    }
}

/// Write the final loop report atomically.
pub fn write_report(path: &Path, report: &LoopReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report)?;
    atomic_write(path, &json)
}

/// Pid file for the running loop; removed on drop of the guard.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current process id.
    pub fn write(path: PathBuf) -> Result<Self> {
        atomic_write(&path, std::process::id().to_string().as_bytes())?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("failed to remove pid file {}: {e}", self.path.display());
        }
    }
}
