//! Isolated agent workspaces.
//!
//! Each agent gets its own git worktree on a dedicated branch, forked
//! from the base branch. Worktrees live under the orchestrator's
//! metadata directory so parallel agents never write into each
//! other's checkouts or the main working tree.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::Config;
use crate::git::Git;
use crate::tasks::slugify;

/// A created workspace: the checkout directory and its branch.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub dir: PathBuf,
    pub branch: String,
}

/// Result of a cleanup request.
#[derive(Debug, Clone, Copy)]
pub struct CleanupOutcome {
    /// True when uncommitted changes prevented removal and the
    /// workspace was kept on disk.
    pub left_in_place: bool,
}

#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    /// Directory under which this provider creates workspaces.
    fn base_dir(&self, work_dir: &Path) -> PathBuf;

    /// Create an isolated workspace for one task.
    async fn create(
        &self,
        task_title: &str,
        agent_num: u64,
        base_branch: &str,
        base: &Path,
        work_dir: &Path,
    ) -> Result<Workspace>;

    /// Remove a workspace. The branch is kept; merged branches are
    /// deleted by the merge pipeline, failed ones stay for review.
    async fn cleanup(
        &self,
        workspace_dir: &Path,
        branch: &str,
        work_dir: &Path,
    ) -> Result<CleanupOutcome>;
}

/// Git-worktree-backed provider.
pub struct WorktreeProvider;

impl WorktreeProvider {
    fn branch_name(agent_num: u64, slug: &str) -> String {
        format!("foreman/agent-{agent_num}-{slug}")
    }
}

#[async_trait]
impl WorkspaceProvider for WorktreeProvider {
    fn base_dir(&self, work_dir: &Path) -> PathBuf {
        Config::new(work_dir).worktree_base()
    }

    async fn create(
        &self,
        task_title: &str,
        agent_num: u64,
        base_branch: &str,
        base: &Path,
        work_dir: &Path,
    ) -> Result<Workspace> {
        let slug = slugify(task_title);
        let branch = Self::branch_name(agent_num, &slug);
        let dir = base.join(format!("agent-{agent_num}-{slug}"));

        tokio::fs::create_dir_all(base)
            .await
            .context("failed to create worktree base directory")?;

        // A stale worktree from a dead run blocks `worktree add`; so
        // does its branch. Agent numbers are unique within a run, so
        // a collision can only be leftovers.
        if dir.exists() {
            warn!(path = %dir.display(), "removing stale worktree");
            let _ = Git::remove_worktree(work_dir, &dir).await;
            if dir.exists() {
                tokio::fs::remove_dir_all(&dir)
                    .await
                    .context("failed to remove stale worktree directory")?;
            }
            let _ = Git::prune_worktrees(work_dir).await;
            let _ = Git::delete_local_branch(&branch, work_dir, true).await;
        }

        Git::add_worktree(work_dir, &dir, &branch, base_branch)
            .await
            .with_context(|| format!("failed to create worktree for '{task_title}'"))?;

        info!(branch = %branch, path = %dir.display(), "workspace created");
        Ok(Workspace { dir, branch })
    }

    async fn cleanup(
        &self,
        workspace_dir: &Path,
        branch: &str,
        work_dir: &Path,
    ) -> Result<CleanupOutcome> {
        if !workspace_dir.exists() {
            return Ok(CleanupOutcome {
                left_in_place: false,
            });
        }

        if Git::is_dirty(workspace_dir).await.unwrap_or(false) {
            info!(branch = %branch, path = %workspace_dir.display(), "uncommitted changes, keeping workspace");
            return Ok(CleanupOutcome {
                left_in_place: true,
            });
        }

        if let Err(e) = Git::remove_worktree(work_dir, workspace_dir).await {
            warn!("worktree remove failed, deleting directory: {e}");
            tokio::fs::remove_dir_all(workspace_dir)
                .await
                .context("failed to remove workspace directory")?;
        }
        let _ = Git::prune_worktrees(work_dir).await;

        Ok(CleanupOutcome {
            left_in_place: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::test_repo::{commit_file, init};
    use tempfile::TempDir;

    #[test]
    fn branch_names_embed_agent_number_and_slug() {
        assert_eq!(
            WorktreeProvider::branch_name(7, "fix-login"),
            "foreman/agent-7-fix-login"
        );
    }

    #[tokio::test]
    async fn create_makes_worktree_on_new_branch() {
        let dir = TempDir::new().unwrap();
        init(dir.path());

        let provider = WorktreeProvider;
        let base = provider.base_dir(dir.path());
        let ws = provider
            .create("Fix login", 1, "main", &base, dir.path())
            .await
            .unwrap();

        assert_eq!(ws.branch, "foreman/agent-1-fix-login");
        assert!(ws.dir.starts_with(dir.path().join(".foreman/worktrees")));
        assert!(ws.dir.join("README.md").exists());
        assert_eq!(Git::current_branch(&ws.dir).await.unwrap(), ws.branch);
        // Main working tree is untouched.
        assert_eq!(Git::current_branch(dir.path()).await.unwrap(), "main");
    }

    #[tokio::test]
    async fn clean_workspace_is_removed_branch_kept() {
        let dir = TempDir::new().unwrap();
        init(dir.path());

        let provider = WorktreeProvider;
        let base = provider.base_dir(dir.path());
        let ws = provider
            .create("Task", 1, "main", &base, dir.path())
            .await
            .unwrap();

        let outcome = provider
            .cleanup(&ws.dir, &ws.branch, dir.path())
            .await
            .unwrap();
        assert!(!outcome.left_in_place);
        assert!(!ws.dir.exists());

        // Branch survives for the merge pipeline.
        Git::return_to_branch(&ws.branch, dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn dirty_workspace_is_left_in_place() {
        let dir = TempDir::new().unwrap();
        init(dir.path());

        let provider = WorktreeProvider;
        let base = provider.base_dir(dir.path());
        let ws = provider
            .create("Task", 1, "main", &base, dir.path())
            .await
            .unwrap();
        std::fs::write(ws.dir.join("wip.txt"), "uncommitted").unwrap();

        let outcome = provider
            .cleanup(&ws.dir, &ws.branch, dir.path())
            .await
            .unwrap();
        assert!(outcome.left_in_place);
        assert!(ws.dir.exists());
    }

    #[tokio::test]
    async fn stale_worktree_is_replaced() {
        let dir = TempDir::new().unwrap();
        init(dir.path());

        let provider = WorktreeProvider;
        let base = provider.base_dir(dir.path());
        let first = provider
            .create("Task", 1, "main", &base, dir.path())
            .await
            .unwrap();
        commit_file(&first.dir, "work.txt", "x\n", "agent work");

        // A dead run left the worktree and branch behind; a new run
        // reusing the same agent number and slug replaces both.
        let second = provider
            .create("Task", 1, "main", &base, dir.path())
            .await
            .unwrap();
        assert_eq!(second.dir, first.dir);
        assert!(second.dir.join("README.md").exists());
        assert!(!second.dir.join("work.txt").exists());
    }
}
