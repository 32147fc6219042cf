//! Well-known paths and product constants.
//!
//! Everything foreman writes lives under a `.foreman/` metadata
//! directory inside the working directory (state file, progress log,
//! worktrees) or inside each agent workspace (tmp files for the tmux
//! driver).

use std::path::{Path, PathBuf};

/// Name of the per-workspace metadata directory.
pub const METADATA_DIR: &str = ".foreman";

/// Fixed prefix for tmux session names managed by foreman.
pub const SESSION_PREFIX: &str = "foreman";

/// Path helpers anchored at the orchestrator's working directory.
#[derive(Debug, Clone)]
pub struct Config {
    work_dir: PathBuf,
}

impl Config {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// `<workDir>/.foreman`
    pub fn metadata_dir(&self) -> PathBuf {
        self.work_dir.join(METADATA_DIR)
    }

    /// State file consumed by dashboards and TUIs. Rewritten in full
    /// on every registry change.
    pub fn state_file(&self) -> PathBuf {
        self.metadata_dir().join("state.json")
    }

    /// Append-only human-readable progress log.
    pub fn progress_file(&self) -> PathBuf {
        self.metadata_dir().join("progress.md")
    }

    /// Root directory under which agent worktrees are created.
    pub fn worktree_base(&self) -> PathBuf {
        self.metadata_dir().join("worktrees")
    }
}

/// Tmp directory for the tmux driver, inside an agent workspace.
pub fn workspace_tmp_dir(workspace: &Path) -> PathBuf {
    workspace.join(METADATA_DIR).join("tmp")
}

/// Metadata directory inside an agent workspace.
pub fn workspace_metadata_dir(workspace: &Path) -> PathBuf {
    workspace.join(METADATA_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_anchored_at_work_dir() {
        let config = Config::new("/tmp/project");
        assert_eq!(
            config.state_file(),
            PathBuf::from("/tmp/project/.foreman/state.json")
        );
        assert_eq!(
            config.progress_file(),
            PathBuf::from("/tmp/project/.foreman/progress.md")
        );
        assert_eq!(
            config.worktree_base(),
            PathBuf::from("/tmp/project/.foreman/worktrees")
        );
    }

    #[test]
    fn workspace_tmp_dir_nests_under_metadata() {
        let tmp = workspace_tmp_dir(Path::new("/ws/agent-1"));
        assert_eq!(tmp, PathBuf::from("/ws/agent-1/.foreman/tmp"));
    }
}
