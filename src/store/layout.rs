//! On-disk layout for a project's task corpus:
//!
//! ```text
//! tasks/<status>/<task-id>.task     // the task record
//! tasks/<status>/<task-id>/         // companion dir: inputs/, work/, outputs/, subtasks/
//! events/<YYYY-MM-DD>.jsonl         // daily event log partitions
//! project.yaml                      // workflow + participants
//! ```

use std::path::{Path, PathBuf};

use crate::model::{TaskId, TaskStatus};

pub const RECORD_EXT: &str = "task";
pub const COMPANION_DIRS: [&str; 4] = ["inputs", "work", "outputs", "subtasks"];

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    pub fn status_dir(&self, status: TaskStatus) -> PathBuf {
        self.tasks_dir().join(status.dir_name())
    }

    pub fn record_path(&self, status: TaskStatus, id: &TaskId) -> PathBuf {
        self.status_dir(status)
            .join(format!("{}.{}", id.as_str(), RECORD_EXT))
    }

    pub fn companion_dir(&self, status: TaskStatus, id: &TaskId) -> PathBuf {
        self.status_dir(status).join(id.as_str())
    }

    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    pub fn event_partition(&self, date: chrono::NaiveDate) -> PathBuf {
        self.events_dir()
            .join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("project.yaml")
    }

    /// Ensures every status directory exists under `tasks/`.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for status in TaskStatus::ALL {
            tokio::fs::create_dir_all(self.status_dir(status)).await?;
        }
        tokio::fs::create_dir_all(self.events_dir()).await?;
        Ok(())
    }
}
