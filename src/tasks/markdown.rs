//! Markdown checklist task source.
//!
//! ```markdown
//! # Backlog
//! - [ ] Add login endpoint
//! - [x] Rework billing
//! ```
//!
//! Ids are slugged titles; completion checks the box in place,
//! leaving the rest of the document untouched. No parallel grouping.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{slugify, Task, TaskSource};

pub struct MarkdownTaskSource {
    path: PathBuf,
    file_lock: Mutex<()>,
}

impl MarkdownTaskSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read task file {}", self.path.display()))
    }

    fn remaining(contents: &str) -> Vec<Task> {
        contents
            .lines()
            .filter_map(unchecked_title)
            .map(|title| Task {
                id: slugify(title),
                title: title.to_string(),
            })
            .collect()
    }
}

/// The title of an unchecked checklist line, if this is one.
fn unchecked_title(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("- [ ]")?;
    let title = rest.trim();
    (!title.is_empty()).then_some(title)
}

#[async_trait]
impl TaskSource for MarkdownTaskSource {
    async fn next_task(&self) -> Result<Option<Task>> {
        let _guard = self.file_lock.lock().await;
        Ok(Self::remaining(&self.load()?).into_iter().next())
    }

    async fn all_tasks(&self) -> Result<Vec<Task>> {
        let _guard = self.file_lock.lock().await;
        Ok(Self::remaining(&self.load()?))
    }

    async fn parallel_group(&self, _title: &str) -> Result<u32> {
        Ok(0)
    }

    async fn tasks_in_group(&self, _group: u32) -> Result<Vec<Task>> {
        Ok(Vec::new())
    }

    async fn mark_complete(&self, id: &str) -> Result<()> {
        let _guard = self.file_lock.lock().await;
        let contents = self.load()?;

        let rewritten: Vec<String> = contents
            .lines()
            .map(|line| {
                match unchecked_title(line) {
                    Some(title) if slugify(title) == id => line.replacen("- [ ]", "- [x]", 1),
                    _ => line.to_string(),
                }
            })
            .collect();

        let mut output = rewritten.join("\n");
        if contents.ends_with('\n') {
            output.push('\n');
        }
        std::fs::write(&self.path, output)
            .with_context(|| format!("failed to write task file {}", self.path.display()))
    }

    async fn count_remaining(&self) -> Result<u64> {
        let _guard = self.file_lock.lock().await;
        Ok(Self::remaining(&self.load()?).len() as u64)
    }
}
