//! Process-wide agent state registry.
//!
//! A single document `{agents, summary, lastUpdate}` shared by the
//! scheduler and every agent callback, guarded by one mutex and
//! rewritten in full to the state file on each change. The file is
//! observability for dashboards, not truth: write errors are logged
//! and swallowed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::process::tmux;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub task: String,
    pub status: AgentStatus,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_update: String,
}

impl Default for AgentRecord {
    fn default() -> Self {
        Self {
            task: String::new(),
            status: AgentStatus::Pending,
            step: "Initializing".to_string(),
            tmux_session: None,
            workspace: None,
            error: None,
            last_update: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_progress: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentRecord>,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default)]
    pub last_update: String,
}

/// Partial update for one agent record. `None` fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub task: Option<String>,
    pub status: Option<AgentStatus>,
    pub step: Option<String>,
    pub tmux_session: Option<String>,
    pub workspace: Option<String>,
    pub error: Option<String>,
}

/// Partial update for the summary. `None` fields are untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryPatch {
    pub total: Option<u64>,
    pub completed: Option<u64>,
    pub failed: Option<u64>,
    pub in_progress: Option<u64>,
}

pub struct StateRegistry {
    state_file: PathBuf,
    doc: Mutex<StateDocument>,
}

impl StateRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            state_file: config.state_file(),
            doc: Mutex::new(StateDocument::default()),
        }
    }

    /// Update one agent, creating the record with defaults on first
    /// touch. Stamps the record and the document with the current
    /// wall-clock time and rewrites the state file.
    pub fn update_agent(&self, agent_id: &str, patch: AgentPatch) {
        let now = timestamp();
        let mut doc = self.doc.lock().unwrap();

        let record = doc.agents.entry(agent_id.to_string()).or_default();
        if let Some(task) = patch.task {
            record.task = task;
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(step) = patch.step {
            record.step = step;
        }
        if let Some(session) = patch.tmux_session {
            record.tmux_session = Some(session);
        }
        if let Some(workspace) = patch.workspace {
            record.workspace = Some(workspace);
        }
        if let Some(error) = patch.error {
            record.error = Some(error);
        }
        record.last_update = now.clone();
        doc.last_update = now;

        persist(&doc, &self.state_file);
    }

    pub fn update_summary(&self, patch: SummaryPatch) {
        let mut doc = self.doc.lock().unwrap();

        if let Some(total) = patch.total {
            doc.summary.total = total;
        }
        if let Some(completed) = patch.completed {
            doc.summary.completed = completed;
        }
        if let Some(failed) = patch.failed {
            doc.summary.failed = failed;
        }
        if let Some(in_progress) = patch.in_progress {
            doc.summary.in_progress = in_progress;
        }
        doc.last_update = timestamp();

        persist(&doc, &self.state_file);
    }

    pub fn remove_agent(&self, agent_id: &str) {
        let mut doc = self.doc.lock().unwrap();
        doc.agents.remove(agent_id);
        doc.last_update = timestamp();
        persist(&doc, &self.state_file);
    }

    pub fn snapshot(&self) -> StateDocument {
        self.doc.lock().unwrap().clone()
    }

    /// Best-effort kill of every live agent's tmux session. Called
    /// from the interrupt/terminate handlers; safe to invoke more
    /// than once.
    pub fn cleanup_tmux_sessions(&self) {
        let sessions: Vec<String> = {
            let doc = self.doc.lock().unwrap();
            doc.agents
                .values()
                .filter(|a| matches!(a.status, AgentStatus::Pending | AgentStatus::Running))
                .filter_map(|a| a.tmux_session.clone())
                .collect()
        };

        for session in sessions {
            tracing::debug!(%session, "killing tmux session");
            tmux::kill_session_blocking(&session);
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Full rewrite via temp file + rename so readers never observe a
/// torn document. Errors are advisory only.
fn persist(doc: &StateDocument, state_file: &Path) {
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = state_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = state_file.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, state_file)?;
        Ok(())
    })();

    if let Err(e) = result {
        tracing::warn!("failed to write state file {}: {e}", state_file.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_in(dir: &TempDir) -> StateRegistry {
        StateRegistry::new(&Config::new(dir.path()))
    }

    #[test]
    fn first_update_creates_record_with_defaults() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);

        registry.update_agent(
            "1",
            AgentPatch {
                task: Some("Fix login".to_string()),
                ..AgentPatch::default()
            },
        );

        let doc = registry.snapshot();
        let record = &doc.agents["1"];
        assert_eq!(record.task, "Fix login");
        assert_eq!(record.status, AgentStatus::Pending);
        assert_eq!(record.step, "Initializing");
        assert!(!record.last_update.is_empty());
    }

    #[test]
    fn patch_touches_only_named_fields() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);

        registry.update_agent(
            "1",
            AgentPatch {
                task: Some("Task".to_string()),
                status: Some(AgentStatus::Running),
                step: Some("Executing".to_string()),
                ..AgentPatch::default()
            },
        );
        registry.update_agent(
            "1",
            AgentPatch {
                step: Some("Testing".to_string()),
                ..AgentPatch::default()
            },
        );

        let record = &registry.snapshot().agents["1"];
        assert_eq!(record.task, "Task");
        assert_eq!(record.status, AgentStatus::Running);
        assert_eq!(record.step, "Testing");
    }

    #[test]
    fn persisted_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);

        registry.update_agent(
            "1",
            AgentPatch {
                task: Some("A".to_string()),
                status: Some(AgentStatus::Completed),
                step: Some("Finished".to_string()),
                workspace: Some("/tmp/ws".to_string()),
                ..AgentPatch::default()
            },
        );
        registry.update_summary(SummaryPatch {
            total: Some(3),
            completed: Some(1),
            ..SummaryPatch::default()
        });

        let contents =
            std::fs::read_to_string(Config::new(dir.path()).state_file()).unwrap();
        let parsed: StateDocument = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed, registry.snapshot());
    }

    #[test]
    fn state_file_uses_camel_case_keys() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);

        registry.update_agent(
            "1",
            AgentPatch {
                tmux_session: Some("foreman-1-task".to_string()),
                ..AgentPatch::default()
            },
        );
        registry.update_summary(SummaryPatch {
            in_progress: Some(2),
            ..SummaryPatch::default()
        });

        let contents =
            std::fs::read_to_string(Config::new(dir.path()).state_file()).unwrap();
        assert!(contents.contains("\"tmuxSession\""));
        assert!(contents.contains("\"inProgress\""));
        assert!(contents.contains("\"lastUpdate\""));
    }

    #[test]
    fn summary_patch_is_partial() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);

        registry.update_summary(SummaryPatch {
            total: Some(10),
            ..SummaryPatch::default()
        });
        registry.update_summary(SummaryPatch {
            completed: Some(4),
            failed: Some(1),
            ..SummaryPatch::default()
        });

        let summary = registry.snapshot().summary;
        assert_eq!(summary.total, 10);
        assert_eq!(summary.completed, 4);
        assert_eq!(summary.failed, 1);
        assert!(summary.completed + summary.failed <= summary.total);
    }

    #[test]
    fn remove_agent_deletes_record() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);

        registry.update_agent("1", AgentPatch::default());
        registry.update_agent("2", AgentPatch::default());
        registry.remove_agent("1");

        let doc = registry.snapshot();
        assert!(!doc.agents.contains_key("1"));
        assert!(doc.agents.contains_key("2"));
    }

    #[test]
    fn write_failure_is_swallowed() {
        let dir = TempDir::new().unwrap();
        // Point the state file at a path whose parent is a file, so
        // create_dir_all fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let registry = StateRegistry {
            state_file: blocker.join("nested").join("state.json"),
            doc: Mutex::new(StateDocument::default()),
        };

        // Must not panic; in-memory document still updates.
        registry.update_agent(
            "1",
            AgentPatch {
                task: Some("T".to_string()),
                ..AgentPatch::default()
            },
        );
        assert_eq!(registry.snapshot().agents["1"].task, "T");
    }

    #[test]
    fn cleanup_is_idempotent_without_sessions() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);
        registry.update_agent("1", AgentPatch::default());
        registry.cleanup_tmux_sessions();
        registry.cleanup_tmux_sessions();
    }
}
