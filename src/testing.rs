//! Test support: canned trackers and scripted workers.
//!
//! These doubles let unit and integration tests drive the full loop
//! without a real worker or tracking backend. The scripted worker is an
//! executable shell script; closure of items is simulated through marker
//! files shared between the script and the stub tracker.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::error::{ForemanError, Result};
use crate::tracker::{ItemStatus, TrackedItem, Tracker};

/// In-memory tracker whose item statuses can be flipped by marker files.
///
/// An item is reported as closed once `closed_<id>` exists in the marker
/// directory; a scripted worker's finalize phase creates that file,
/// closing the loop between the two processes.
pub struct StubTracker {
    items: Vec<TrackedItem>,
    marker_dir: PathBuf,
    fail_ready_calls: AtomicU32,
    sync_calls: AtomicU32,
}

impl StubTracker {
    #[must_use]
    pub fn new(items: Vec<TrackedItem>, marker_dir: impl Into<PathBuf>) -> Self {
        Self {
            items,
            marker_dir: marker_dir.into(),
            fail_ready_calls: AtomicU32::new(0),
            sync_calls: AtomicU32::new(0),
        }
    }

    /// Make the next `n` ready-item queries fail with a tracker fault.
    pub fn fail_next_ready_calls(&self, n: u32) {
        self.fail_ready_calls.store(n, Ordering::SeqCst);
    }

    /// How many sync passes have run.
    #[must_use]
    pub fn sync_count(&self) -> u32 {
        self.sync_calls.load(Ordering::SeqCst)
    }

    fn current_status(&self, item: &TrackedItem) -> ItemStatus {
        if self.marker_dir.join(format!("closed_{}", item.id)).exists() {
            ItemStatus::Closed
        } else {
            item.status
        }
    }

    fn materialize(&self, item: &TrackedItem) -> TrackedItem {
        TrackedItem {
            status: self.current_status(item),
            ..item.clone()
        }
    }
}

#[async_trait]
impl Tracker for StubTracker {
    async fn sync(&self) -> Result<()> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_items(&self) -> Result<Vec<TrackedItem>> {
        Ok(self.items.iter().map(|i| self.materialize(i)).collect())
    }

    async fn list_ready(&self) -> Result<Vec<TrackedItem>> {
        let outstanding = self.fail_ready_calls.load(Ordering::SeqCst);
        if outstanding > 0 {
            self.fail_ready_calls.store(outstanding - 1, Ordering::SeqCst);
            return Err(ForemanError::tracker("ready", "injected fault"));
        }
        Ok(self
            .items
            .iter()
            .map(|i| self.materialize(i))
            .filter(|i| i.status == ItemStatus::Ready)
            .collect())
    }

    async fn get_item(&self, id: &str) -> Result<TrackedItem> {
        self.items
            .iter()
            .find(|i| i.id == id)
            .map(|i| self.materialize(i))
            .ok_or_else(|| ForemanError::tracker("show", format!("no such item {id}")))
    }

    async fn list_children(&self, parent: &str) -> Result<Vec<TrackedItem>> {
        Ok(self
            .items
            .iter()
            .filter(|i| i.parent.as_deref() == Some(parent))
            .map(|i| self.materialize(i))
            .collect())
    }

    async fn latest_change_ref(&self) -> Result<String> {
        Ok("0000000".to_string())
    }
}

/// Build a ready item for fixtures.
#[must_use]
pub fn ready_item(id: &str, priority: i64, created_ord: u64) -> TrackedItem {
    TrackedItem {
        id: id.to_string(),
        title: format!("Item {id}"),
        status: ItemStatus::Ready,
        parent: None,
        priority,
        created_ord,
    }
}

/// Write an executable worker script with the standard argv prelude.
///
/// The body runs with `$phase`, `$task`, and `$ctx` bound, and `$dir` set
/// to the script's own directory (where marker files live).
pub fn write_worker_script(dir: &Path, body: &str) -> std::io::Result<PathBuf> {
    let path = dir.join("worker.sh");
    let script = format!(
        r#"#!/bin/sh
dir="$(cd "$(dirname "$0")" && pwd)"
phase=""; task=""; ctx=""
while [ $# -gt 0 ]; do
  case "$1" in
    --phase) phase="$2"; shift 2 ;;
    --task) task="$2"; shift 2 ;;
    --retry-context) ctx="$2"; shift 2 ;;
    *) shift ;;
  esac
done
{body}
"#
    );
    std::fs::write(&path, script)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(path)
}

/// A worker whose phases all succeed, closing items during finalize.
pub fn well_behaved_worker(dir: &Path) -> std::io::Result<PathBuf> {
    write_worker_script(
        dir,
        r#"case "$phase" in
  implement)
    echo '{"type":"action","id":"tc_1","name":"edit_file","input":"src/lib.rs"}'
    echo '{"type":"action_result","id":"tc_1","output":"edited","success":true}'
    echo '```intent'
    echo 'why: clear the work item'
    echo 'before: failing'
    echo 'after: passing'
    echo '```'
    ;;
  review)
    echo '```review'
    echo 'verdict: approved'
    echo '```'
    ;;
  finalize)
    touch "$dir/closed_$task"
    ;;
  accept)
    echo accepted
    ;;
esac
exit 0"#,
    )
}

/// A worker whose review phase always rejects with two issues.
pub fn always_rejecting_worker(dir: &Path) -> std::io::Result<PathBuf> {
    write_worker_script(
        dir,
        r#"case "$phase" in
  implement)
    echo implemented
    ;;
  review)
    echo '```review'
    echo 'verdict: needs-changes'
    echo 'continue: true'
    echo 'blocking_issues: 2'
    echo '```'
    echo 'ISSUE [major] src/lib.rs:10 - wrong result | fix: invert the check'
    echo 'ISSUE [minor] src/lib.rs:20 - stray log line'
    ;;
  *)
    ;;
esac
exit 0"#,
    )
}
