//! YAML task source.
//!
//! ```yaml
//! tasks:
//!   - title: Add login endpoint
//!     parallel_group: 1
//!   - id: fix-logout
//!     title: Fix logout redirect
//!     parallel_group: 1
//!   - title: Rework billing
//!     done: true
//! ```
//!
//! Tasks sharing a non-zero `parallel_group` are offered to the
//! scheduler as one batch. Missing ids fall back to the slugged title.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{slugify, Task, TaskSource};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<TaskEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    title: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parallel_group: Option<u32>,
}

impl TaskEntry {
    fn task_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| slugify(&self.title))
    }

    fn to_task(&self) -> Task {
        Task {
            id: self.task_id(),
            title: self.title.clone(),
        }
    }
}

pub struct YamlTaskSource {
    path: PathBuf,
    // Serializes read-modify-write cycles on the backing file.
    file_lock: Mutex<()>,
}

impl YamlTaskSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<TaskFile> {
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read task file {}", self.path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse task file {}", self.path.display()))
    }

    fn store(&self, file: &TaskFile) -> Result<()> {
        let contents = serde_yaml::to_string(file)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write task file {}", self.path.display()))
    }
}

#[async_trait]
impl TaskSource for YamlTaskSource {
    async fn next_task(&self) -> Result<Option<Task>> {
        let _guard = self.file_lock.lock().await;
        let file = self.load()?;
        Ok(file.tasks.iter().find(|t| !t.done).map(TaskEntry::to_task))
    }

    async fn all_tasks(&self) -> Result<Vec<Task>> {
        let _guard = self.file_lock.lock().await;
        let file = self.load()?;
        Ok(file
            .tasks
            .iter()
            .filter(|t| !t.done)
            .map(TaskEntry::to_task)
            .collect())
    }

    async fn parallel_group(&self, title: &str) -> Result<u32> {
        let _guard = self.file_lock.lock().await;
        let file = self.load()?;
        Ok(file
            .tasks
            .iter()
            .find(|t| !t.done && t.title == title)
            .and_then(|t| t.parallel_group)
            .unwrap_or(0))
    }

    async fn tasks_in_group(&self, group: u32) -> Result<Vec<Task>> {
        let _guard = self.file_lock.lock().await;
        let file = self.load()?;
        Ok(file
            .tasks
            .iter()
            .filter(|t| !t.done && t.parallel_group == Some(group))
            .map(TaskEntry::to_task)
            .collect())
    }

    async fn mark_complete(&self, id: &str) -> Result<()> {
        let _guard = self.file_lock.lock().await;
        let mut file = self.load()?;
        for entry in &mut file.tasks {
            if entry.task_id() == id {
                entry.done = true;
            }
        }
        self.store(&file)
    }

    async fn count_remaining(&self) -> Result<u64> {
        let _guard = self.file_lock.lock().await;
        let file = self.load()?;
        Ok(file.tasks.iter().filter(|t| !t.done).count() as u64)
    }

    fn supports_parallel_groups(&self) -> bool {
        true
    }
}
