//! Task backlog sources.
//!
//! The scheduler only knows this contract; concrete sources are
//! file-backed (YAML with parallel groups, Markdown checklists) and
//! re-read the file on every call so edits made mid-run are picked up
//! at the next batch boundary.

pub mod markdown;
pub mod yaml;

use std::path::Path;

use anyhow::{bail, Result};
use async_trait::async_trait;

/// One unit of work. Identity is the id; the title is for display
/// and slug derivation only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
}

#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Next remaining task, if any.
    async fn next_task(&self) -> Result<Option<Task>>;

    /// All remaining tasks.
    async fn all_tasks(&self) -> Result<Vec<Task>>;

    /// Parallel group of the task with this title; 0 = ungrouped.
    async fn parallel_group(&self, title: &str) -> Result<u32>;

    /// Remaining tasks in a group.
    async fn tasks_in_group(&self, group: u32) -> Result<Vec<Task>>;

    /// Mark a task done in the backing file.
    async fn mark_complete(&self, id: &str) -> Result<()>;

    /// Count of remaining tasks.
    async fn count_remaining(&self) -> Result<u64>;

    /// Whether the source can batch tasks by parallel group.
    fn supports_parallel_groups(&self) -> bool {
        false
    }
}

/// Derive a slug from a title: non-alphanumeric characters become
/// `-`, everything lower-cased. Shared by task ids, branch names, and
/// tmux session names.
pub fn slugify(title: &str) -> String {
    title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Pick a source implementation from the backlog file extension.
pub fn source_for_path(path: &Path) -> Result<Box<dyn TaskSource>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => Ok(Box::new(yaml::YamlTaskSource::new(path))),
        Some("md" | "markdown") => Ok(Box::new(markdown::MarkdownTaskSource::new(path))),
        _ => bail!(
            "unsupported task file '{}': expected .yaml, .yml, or .md",
            path.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_lowers_and_dashes() {
        assert_eq!(slugify("Fix login"), "fix-login");
        assert_eq!(slugify("Add OAuth2 support!"), "add-oauth2-support-");
        assert_eq!(slugify("already-slugged"), "already-slugged");
    }

    #[test]
    fn source_for_path_dispatches_on_extension() {
        assert!(source_for_path(Path::new("tasks.yaml")).is_ok());
        assert!(source_for_path(Path::new("tasks.yml")).is_ok());
        assert!(source_for_path(Path::new("todo.md")).is_ok());
        assert!(source_for_path(Path::new("tasks.json")).is_err());
        assert!(source_for_path(Path::new("tasks")).is_err());
    }
}
