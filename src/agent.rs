//! Agent runtime: runs exactly one task in an isolated workspace.
//!
//! The runtime never returns an error; everything that prevents the
//! task from making progress is captured in the returned
//! [`AgentRun`] so the scheduler can record it uniformly and keep the
//! batch going.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::{self, Config};
use crate::engine::{stream, Engine, EngineOptions, EngineResult, ProgressCallback};
use crate::notify;
use crate::process::tmux;
use crate::prompt::{build_prompt, PromptFlags};
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::state::{AgentPatch, AgentStatus, StateRegistry};
use crate::tasks::{slugify, Task};
use crate::workspace::WorkspaceProvider;

/// Where the requirements live in the orchestrator's working
/// directory, so they can be copied into each workspace.
#[derive(Debug, Clone)]
pub struct RequirementSource {
    pub path: PathBuf,
    pub is_folder: bool,
}

/// Everything an agent needs that outlives a single task.
pub struct AgentEnv {
    pub engine: Arc<dyn Engine>,
    pub provider: Arc<dyn WorkspaceProvider>,
    pub registry: Arc<StateRegistry>,
    pub config: Config,
    pub base_branch: String,
    pub workspace_base: PathBuf,
    pub requirements: Option<RequirementSource>,
    pub prompt_flags: PromptFlags,
    pub retry: RetryPolicy,
    pub tmux: bool,
    pub model_override: Option<String>,
}

/// How one agent ended.
#[derive(Debug)]
pub enum AgentOutcome {
    /// The engine ran to completion (successfully or not).
    Engine(EngineResult),
    /// The agent never got a usable engine answer (workspace failure,
    /// spawn failure, exhausted retries).
    Error(String),
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Engine(res) if res.success)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Engine(res) => res.error.as_deref(),
            Self::Error(msg) => Some(msg),
        }
    }
}

/// Report handed back to the scheduler. Workspace cleanup is the
/// scheduler's job, not the runtime's.
#[derive(Debug)]
pub struct AgentRun {
    pub task: Task,
    pub agent_id: String,
    pub workspace: Option<PathBuf>,
    pub branch: Option<String>,
    pub outcome: AgentOutcome,
}

/// Run one task to completion as agent number `agent_num`.
pub async fn run_agent(env: Arc<AgentEnv>, task: Task, agent_num: u64) -> AgentRun {
    let agent_id = agent_num.to_string();
    let registry = &env.registry;

    registry.update_agent(
        &agent_id,
        AgentPatch {
            task: Some(task.title.clone()),
            status: Some(AgentStatus::Pending),
            step: Some("Creating worktree".to_string()),
            ..AgentPatch::default()
        },
    );

    let workspace = match env
        .provider
        .create(
            &task.title,
            agent_num,
            &env.base_branch,
            &env.workspace_base,
            env.config.work_dir(),
        )
        .await
    {
        Ok(ws) => ws,
        Err(e) => {
            let message = format!("workspace creation failed: {e:#}");
            return fail(env.clone(), task, agent_id, None, None, message);
        }
    };

    registry.update_agent(
        &agent_id,
        AgentPatch {
            step: Some("Preparing worktree".to_string()),
            workspace: Some(workspace.dir.display().to_string()),
            ..AgentPatch::default()
        },
    );

    if let Err(e) = prepare_workspace(&env, &workspace.dir).await {
        let message = format!("workspace preparation failed: {e:#}");
        return fail(
            env.clone(),
            task,
            agent_id,
            Some(workspace.dir),
            Some(workspace.branch),
            message,
        );
    }

    let prompt = build_prompt(&task, &env.prompt_flags);
    let task_slug = slugify(&task.title);

    let options = EngineOptions {
        model_override: env.model_override.clone(),
        tmux: env.tmux,
        agent_id: Some(agent_id.clone()),
        task_slug: Some(task_slug.clone()),
        on_progress: None,
    };

    if env.tmux {
        let session = tmux::session_name(&agent_id, &task_slug);
        registry.update_agent(
            &agent_id,
            AgentPatch {
                status: Some(AgentStatus::Running),
                step: Some("Executing (tmux)".to_string()),
                tmux_session: Some(session.clone()),
                ..AgentPatch::default()
            },
        );
        notify::info(&format!(
            "agent {agent_id} ({}): attach with `tmux attach -t {session}`",
            task.title
        ));
    } else {
        registry.update_agent(
            &agent_id,
            AgentPatch {
                status: Some(AgentStatus::Running),
                step: Some("Executing".to_string()),
                ..AgentPatch::default()
            },
        );
    }

    let on_progress: ProgressCallback = {
        let registry = registry.clone();
        let agent_id = agent_id.clone();
        Arc::new(move |line: &str| {
            if let Some(step) = stream::detect_step(line) {
                registry.update_agent(
                    &agent_id,
                    AgentPatch {
                        step: Some(step.to_string()),
                        ..AgentPatch::default()
                    },
                );
            }
        })
    };

    let result = execute_with_retry(
        env.engine.as_ref(),
        &prompt,
        &workspace.dir,
        on_progress,
        &options,
        &env.retry,
    )
    .await;

    match result {
        Ok(res) if res.success => {
            info!(agent = %agent_id, task = %task.title, "agent completed");
            registry.update_agent(
                &agent_id,
                AgentPatch {
                    status: Some(AgentStatus::Completed),
                    step: Some("Finished".to_string()),
                    ..AgentPatch::default()
                },
            );
            AgentRun {
                task,
                agent_id,
                workspace: Some(workspace.dir),
                branch: Some(workspace.branch),
                outcome: AgentOutcome::Engine(res),
            }
        }
        Ok(res) => {
            let message = res
                .error
                .clone()
                .unwrap_or_else(|| "engine reported failure".to_string());
            error!(agent = %agent_id, task = %task.title, %message, "agent failed");
            registry.update_agent(
                &agent_id,
                AgentPatch {
                    status: Some(AgentStatus::Failed),
                    step: Some("Failed".to_string()),
                    error: Some(message),
                    ..AgentPatch::default()
                },
            );
            AgentRun {
                task,
                agent_id,
                workspace: Some(workspace.dir),
                branch: Some(workspace.branch),
                outcome: AgentOutcome::Engine(res),
            }
        }
        Err(e) => {
            let message = format!("{e:#}");
            fail(
                env.clone(),
                task,
                agent_id,
                Some(workspace.dir),
                Some(workspace.branch),
                message,
            )
        }
    }
}

fn fail(
    env: Arc<AgentEnv>,
    task: Task,
    agent_id: String,
    workspace: Option<PathBuf>,
    branch: Option<String>,
    message: String,
) -> AgentRun {
    error!(agent = %agent_id, task = %task.title, %message, "agent failed");
    env.registry.update_agent(
        &agent_id,
        AgentPatch {
            status: Some(AgentStatus::Failed),
            step: Some("Failed".to_string()),
            error: Some(message.clone()),
            ..AgentPatch::default()
        },
    );
    AgentRun {
        task,
        agent_id,
        workspace,
        branch,
        outcome: AgentOutcome::Error(message),
    }
}

/// Copy requirement files into the workspace and create the metadata
/// directory. A missing requirement source is silently skipped.
async fn prepare_workspace(env: &AgentEnv, workspace_dir: &Path) -> Result<()> {
    if let Some(req) = &env.requirements {
        let source = if req.path.is_absolute() {
            req.path.clone()
        } else {
            env.config.work_dir().join(&req.path)
        };

        if source.exists() {
            let relative = source
                .strip_prefix(env.config.work_dir())
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(source.file_name().unwrap_or_default()));
            let dest = workspace_dir.join(relative);

            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("failed to create requirement destination directory")?;
            }

            if req.is_folder {
                copy_dir_recursive(&source, &dest).await?;
            } else {
                tokio::fs::copy(&source, &dest)
                    .await
                    .with_context(|| format!("failed to copy {}", source.display()))?;
            }
        }
    }

    tokio::fs::create_dir_all(config::workspace_metadata_dir(workspace_dir))
        .await
        .context("failed to create workspace metadata directory")?;

    Ok(())
}

async fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<()> {
    let mut pending = vec![(source.to_path_buf(), dest.to_path_buf())];

    while let Some((src, dst)) = pending.pop() {
        tokio::fs::create_dir_all(&dst).await?;
        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let from = entry.path();
            let to = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((from, to));
            } else {
                tokio::fs::copy(&from, &to)
                    .await
                    .with_context(|| format!("failed to copy {}", from.display()))?;
            }
        }
    }

    Ok(())
}
