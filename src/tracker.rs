//! Work-item tracking subsystem boundary.
//!
//! The tracker is an external collaborator reached through a small query
//! surface: list ready items, fetch item detail, list children, and read
//! the latest committed change reference. All calls are synchronous from
//! the loop's point of view and bounded by an explicit timeout.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TRACKER_CALL_TIMEOUT_SECS;
use crate::error::{ForemanError, Result};
use crate::models::QueueSnapshot;

/// Status of a tracked item, as the core needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ready,
    InProgress,
    Closed,
}

/// One work item as reported by the tracker. No schema beyond this is
/// required by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedItem {
    pub id: String,
    pub title: String,
    pub status: ItemStatus,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub priority: i64,
    /// Creation-order ordinal, used as the deterministic tie-break.
    #[serde(default)]
    pub created_ord: u64,
}

/// Query/command surface of the tracking subsystem.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// One synchronization pass. Failures are non-fatal to the loop.
    async fn sync(&self) -> Result<()>;

    /// All items the tracker currently knows, any status.
    async fn list_items(&self) -> Result<Vec<TrackedItem>>;

    /// Items ready to be worked.
    async fn list_ready(&self) -> Result<Vec<TrackedItem>>;

    /// Detail for one item.
    async fn get_item(&self, id: &str) -> Result<TrackedItem>;

    /// Children of a parent grouping.
    async fn list_children(&self, parent: &str) -> Result<Vec<TrackedItem>>;

    /// Latest committed change reference.
    async fn latest_change_ref(&self) -> Result<String>;

    /// Capture a queue snapshot partitioned by status.
    async fn capture_snapshot(&self) -> Result<QueueSnapshot> {
        let items = self.list_items().await?;
        let mut snapshot = QueueSnapshot::default();
        for item in items {
            match item.status {
                ItemStatus::Ready => snapshot.ready.push(item.id),
                ItemStatus::InProgress => snapshot.in_progress.push(item.id),
                ItemStatus::Closed => snapshot.closed.push(item.id),
            }
        }
        Ok(snapshot)
    }

    /// Whether `id` is the last open child of `parent`.
    async fn is_last_open_child(&self, parent: &str, id: &str) -> Result<bool> {
        let children = self.list_children(parent).await?;
        Ok(children
            .iter()
            .all(|child| child.id == id || child.status == ItemStatus::Closed))
    }
}

/// Tracker reached by spawning a CLI that prints JSON on stdout.
pub struct ProcessTracker {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
}

impl ProcessTracker {
    /// Create from a command vector: program followed by base arguments.
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, base_args) = command.split_first().ok_or_else(|| {
            ForemanError::config("tracker command must name a program")
        })?;
        Ok(Self {
            program: program.clone(),
            base_args: base_args.to_vec(),
            timeout: Duration::from_secs(TRACKER_CALL_TIMEOUT_SECS),
        })
    }

    /// Override the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one tracker subcommand and return its stdout.
    async fn call(&self, operation: &str, args: &[&str]) -> Result<String> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg(operation)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        debug!("tracker call: {operation} {args:?}");
        let output = tokio::time::timeout(self.timeout, async {
            cmd.output()
                .await
                .map_err(|e| ForemanError::tracker(operation, e.to_string()))
        })
        .await
        .map_err(|_| {
            ForemanError::tracker(operation, format!("timed out after {:?}", self.timeout))
        })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ForemanError::tracker(
                operation,
                format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn parse_items(operation: &str, stdout: &str) -> Result<Vec<TrackedItem>> {
        serde_json::from_str(stdout.trim())
            .map_err(|e| ForemanError::tracker(operation, format!("bad JSON: {e}")))
    }
}

#[async_trait]
impl Tracker for ProcessTracker {
    async fn sync(&self) -> Result<()> {
        self.call("sync", &[]).await.map(|_| ())
    }

    async fn list_items(&self) -> Result<Vec<TrackedItem>> {
        let stdout = self.call("list", &[]).await?;
        Self::parse_items("list", &stdout)
    }

    async fn list_ready(&self) -> Result<Vec<TrackedItem>> {
        let stdout = self.call("ready", &[]).await?;
        Self::parse_items("ready", &stdout)
    }

    async fn get_item(&self, id: &str) -> Result<TrackedItem> {
        let stdout = self.call("show", &[id]).await?;
        serde_json::from_str(stdout.trim())
            .map_err(|e| ForemanError::tracker("show", format!("bad JSON: {e}")))
    }

    async fn list_children(&self, parent: &str) -> Result<Vec<TrackedItem>> {
        let stdout = self.call("children", &[parent]).await?;
        Self::parse_items("children", &stdout)
    }

    async fn latest_change_ref(&self) -> Result<String> {
        let stdout = self.call("head", &[]).await?;
        Ok(stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn scripted_tracker(dir: &TempDir, body: &str) -> ProcessTracker {
        let path = dir.path().join("tracker.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{body}").unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        ProcessTracker::new(&[path.to_string_lossy().to_string()]).unwrap()
    }

    const TWO_ITEMS: &str = r#"[
        {"id":"item-1","title":"First","status":"ready","priority":2,"created_ord":1},
        {"id":"item-2","title":"Second","status":"closed","parent":"epic-1","priority":1,"created_ord":2}
    ]"#;

    #[tokio::test]
    async fn test_list_ready_parses_items() {
        let dir = TempDir::new().unwrap();
        let tracker = scripted_tracker(
            &dir,
            &format!("[ \"$1\" = ready ] && cat <<'JSON'\n{TWO_ITEMS}\nJSON"),
        );
        let items = tracker.list_ready().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "item-1");
        assert_eq!(items[0].status, ItemStatus::Ready);
        assert_eq!(items[1].parent.as_deref(), Some("epic-1"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_tracker_fault() {
        let dir = TempDir::new().unwrap();
        let tracker = scripted_tracker(&dir, "echo 'backend down' >&2; exit 1");
        let err = tracker.list_ready().await.unwrap_err();
        assert!(matches!(err, ForemanError::Tracker { .. }));
        assert!(err.to_string().contains("backend down"));
    }

    #[tokio::test]
    async fn test_bad_json_is_tracker_fault() {
        let dir = TempDir::new().unwrap();
        let tracker = scripted_tracker(&dir, "echo 'not json'");
        assert!(matches!(
            tracker.list_items().await,
            Err(ForemanError::Tracker { .. })
        ));
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let dir = TempDir::new().unwrap();
        let tracker =
            scripted_tracker(&dir, "sleep 30").with_timeout(Duration::from_millis(200));
        let err = tracker.sync().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_capture_snapshot_partitions() {
        let dir = TempDir::new().unwrap();
        let tracker = scripted_tracker(
            &dir,
            &format!("[ \"$1\" = list ] && cat <<'JSON'\n{TWO_ITEMS}\nJSON"),
        );
        let snapshot = tracker.capture_snapshot().await.unwrap();
        assert_eq!(snapshot.ready, vec!["item-1".to_string()]);
        assert!(snapshot.in_progress.is_empty());
        assert_eq!(snapshot.closed, vec!["item-2".to_string()]);
    }

    #[tokio::test]
    async fn test_latest_change_ref_trims() {
        let dir = TempDir::new().unwrap();
        let tracker = scripted_tracker(&dir, "echo 'abc123  '");
        assert_eq!(tracker.latest_change_ref().await.unwrap(), "abc123");
    }
}
