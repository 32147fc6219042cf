//! Git CLI wrapper for branch, worktree, and merge operations.
//!
//! Uses the git CLI directly (rather than libgit2) so behavior
//! matches whatever hooks and config the host repository carries.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Result of attempting to merge an agent branch.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub success: bool,
    pub has_conflicts: bool,
    pub conflicted_files: Vec<String>,
    pub error: Option<String>,
}

pub struct Git;

impl Git {
    async fn run(args: &[&str], cwd: &Path) -> Result<String> {
        debug!(?args, ?cwd, "running git");

        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("failed to execute git")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run_silent(args: &[&str], cwd: &Path) -> Result<()> {
        Self::run(args, cwd).await?;
        Ok(())
    }

    pub async fn current_branch(work_dir: &Path) -> Result<String> {
        Self::run(&["rev-parse", "--abbrev-ref", "HEAD"], work_dir).await
    }

    /// Switch the main working tree back to `branch`.
    pub async fn return_to_branch(branch: &str, work_dir: &Path) -> Result<()> {
        Self::run_silent(&["checkout", branch], work_dir).await
    }

    /// Merge an agent branch into `target` on the main working tree.
    /// Conflicts are reported, not treated as errors; the merge is
    /// left in progress for the resolver.
    pub async fn merge_agent_branch(
        branch: &str,
        target: &str,
        work_dir: &Path,
    ) -> Result<MergeOutcome> {
        let current = Self::current_branch(work_dir).await?;
        if current != target {
            Self::return_to_branch(target, work_dir).await?;
        }

        let message = format!("Merge {branch}");
        match Self::run_silent(&["merge", "--no-ff", "-m", &message, branch], work_dir).await {
            Ok(()) => Ok(MergeOutcome {
                success: true,
                ..MergeOutcome::default()
            }),
            Err(merge_err) => {
                let conflicted = Self::conflicted_files(work_dir).await.unwrap_or_default();
                if conflicted.is_empty() {
                    Ok(MergeOutcome {
                        error: Some(merge_err.to_string()),
                        ..MergeOutcome::default()
                    })
                } else {
                    Ok(MergeOutcome {
                        has_conflicts: true,
                        conflicted_files: conflicted,
                        ..MergeOutcome::default()
                    })
                }
            }
        }
    }

    /// Files currently in conflicted (unmerged) state.
    pub async fn conflicted_files(work_dir: &Path) -> Result<Vec<String>> {
        let output = Self::run(
            &["diff", "--name-only", "--diff-filter=U"],
            work_dir,
        )
        .await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Whether a merge is still in progress (MERGE_HEAD exists).
    pub async fn merge_in_progress(work_dir: &Path) -> bool {
        Self::run(&["rev-parse", "-q", "--verify", "MERGE_HEAD"], work_dir)
            .await
            .is_ok()
    }

    /// Conclude an in-progress merge with the default message.
    pub async fn commit_merge(work_dir: &Path) -> Result<()> {
        Self::run_silent(&["commit", "--no-edit"], work_dir).await
    }

    /// Return the working tree to its pre-merge state.
    pub async fn abort_merge(work_dir: &Path) -> Result<()> {
        Self::run_silent(&["merge", "--abort"], work_dir).await
    }

    pub async fn delete_local_branch(branch: &str, work_dir: &Path, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        Self::run_silent(&["branch", flag, branch], work_dir).await
    }

    /// Whether the working tree has uncommitted changes.
    pub async fn is_dirty(path: &Path) -> Result<bool> {
        let output = Self::run(&["status", "--porcelain"], path).await?;
        Ok(!output.is_empty())
    }

    pub async fn add_worktree(
        repo_path: &Path,
        worktree_path: &Path,
        branch: &str,
        base: &str,
    ) -> Result<()> {
        let worktree_str = worktree_path.to_string_lossy();
        Self::run_silent(
            &["worktree", "add", "-b", branch, &worktree_str, base],
            repo_path,
        )
        .await
    }

    pub async fn remove_worktree(repo_path: &Path, worktree_path: &Path) -> Result<()> {
        let worktree_str = worktree_path.to_string_lossy();
        Self::run_silent(&["worktree", "remove", "--force", &worktree_str], repo_path).await
    }

    pub async fn prune_worktrees(repo_path: &Path) -> Result<()> {
        Self::run_silent(&["worktree", "prune"], repo_path).await
    }
}


#[cfg(test)]
mod tests {
    use super::test_repo::{commit_file, git, init};
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn current_branch_reports_head() {
        let dir = TempDir::new().unwrap();
        init(dir.path());
        assert_eq!(Git::current_branch(dir.path()).await.unwrap(), "main");

        git(&["checkout", "-b", "feat/x"], dir.path());
        assert_eq!(Git::current_branch(dir.path()).await.unwrap(), "feat/x");
    }

    #[tokio::test]
    async fn clean_merge_succeeds_and_branch_can_be_deleted() {
        let dir = TempDir::new().unwrap();
        init(dir.path());

        git(&["checkout", "-b", "agent-1"], dir.path());
        commit_file(dir.path(), "new.txt", "content\n", "add new file");
        git(&["checkout", "main"], dir.path());

        let outcome = Git::merge_agent_branch("agent-1", "main", dir.path())
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(!outcome.has_conflicts);

        Git::delete_local_branch("agent-1", dir.path(), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn conflicting_merge_reports_conflicted_files() {
        let dir = TempDir::new().unwrap();
        init(dir.path());
        commit_file(dir.path(), "f.txt", "original\n", "base");

        git(&["checkout", "-b", "agent-1"], dir.path());
        commit_file(dir.path(), "f.txt", "from agent\n", "agent change");
        git(&["checkout", "main"], dir.path());
        commit_file(dir.path(), "f.txt", "from main\n", "main change");

        let outcome = Git::merge_agent_branch("agent-1", "main", dir.path())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.has_conflicts);
        assert_eq!(outcome.conflicted_files, vec!["f.txt"]);
        assert!(Git::merge_in_progress(dir.path()).await);

        Git::abort_merge(dir.path()).await.unwrap();
        assert!(!Git::merge_in_progress(dir.path()).await);
        let contents = std::fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert_eq!(contents, "from main\n");
    }

    #[tokio::test]
    async fn merge_switches_to_target_branch_first() {
        let dir = TempDir::new().unwrap();
        init(dir.path());

        git(&["checkout", "-b", "agent-1"], dir.path());
        commit_file(dir.path(), "a.txt", "a\n", "agent work");
        // Still on agent-1; merging into main must check main out first.
        let outcome = Git::merge_agent_branch("agent-1", "main", dir.path())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(Git::current_branch(dir.path()).await.unwrap(), "main");
    }

    #[tokio::test]
    async fn worktree_add_and_remove() {
        let dir = TempDir::new().unwrap();
        init(dir.path());
        let worktree = dir.path().join("wt");

        Git::add_worktree(dir.path(), &worktree, "agent-branch", "main")
            .await
            .unwrap();
        assert!(worktree.join("README.md").exists());
        assert_eq!(Git::current_branch(&worktree).await.unwrap(), "agent-branch");

        Git::remove_worktree(dir.path(), &worktree).await.unwrap();
        assert!(!worktree.exists());
        Git::prune_worktrees(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn dirty_detection() {
        let dir = TempDir::new().unwrap();
        init(dir.path());
        assert!(!Git::is_dirty(dir.path()).await.unwrap());

        std::fs::write(dir.path().join("scratch.txt"), "wip").unwrap();
        assert!(Git::is_dirty(dir.path()).await.unwrap());
    }
}
