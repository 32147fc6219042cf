//! Parallel scheduler: batches tasks from the source, fans out
//! agents, collects results, then drives the merge phase.
//!
//! The scheduler runs on one control flow. Within a batch up to
//! `max_parallel` agents execute concurrently; the whole fan-out is
//! joined before any result is processed, and results are processed
//! in launch order so `completed_branches` (and therefore merge
//! order) is deterministic for a fixed batch order.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::agent::{run_agent, AgentEnv, AgentOutcome, AgentRun, RequirementSource};
use crate::config::Config;
use crate::engine::Engine;
use crate::git::Git;
use crate::merge::{self, MergeReport};
use crate::notify;
use crate::prompt::PromptFlags;
use crate::retry::RetryPolicy;
use crate::state::{StateRegistry, SummaryPatch};
use crate::tasks::{Task, TaskSource};
use crate::workspace::WorkspaceProvider;

/// Execution options for one orchestrator run.
pub struct RunOptions {
    pub work_dir: PathBuf,
    pub skip_tests: bool,
    pub skip_lint: bool,
    pub dry_run: bool,
    /// 0 = run until the source is drained.
    pub max_iterations: u64,
    pub retry: RetryPolicy,
    /// Empty = merge into the branch the run started on.
    pub base_branch: String,
    pub max_parallel: usize,
    pub requirements: Option<RequirementSource>,
    pub browser_enabled: bool,
    pub model_override: Option<String>,
    pub skip_merge: bool,
    pub tmux: bool,
}

/// What a run did, for callers and tests.
#[derive(Debug, Default)]
pub struct RunReport {
    pub iterations: u64,
    pub completed: u64,
    pub failed: u64,
    pub completed_branches: Vec<String>,
    pub merge: Option<MergeReport>,
}

pub async fn run(
    engine: Arc<dyn Engine>,
    source: Arc<dyn TaskSource>,
    provider: Arc<dyn WorkspaceProvider>,
    registry: Arc<StateRegistry>,
    options: RunOptions,
) -> Result<RunReport> {
    let config = Config::new(&options.work_dir);
    let workspace_base = provider.base_dir(&options.work_dir);

    let starting_branch = Git::current_branch(&options.work_dir)
        .await
        .context("working directory is not a git repository")?;
    let base_branch = if options.base_branch.is_empty() {
        starting_branch.clone()
    } else {
        options.base_branch.clone()
    };

    let env = Arc::new(AgentEnv {
        engine: engine.clone(),
        provider: provider.clone(),
        registry: registry.clone(),
        config: config.clone(),
        base_branch: base_branch.clone(),
        workspace_base,
        requirements: options.requirements.clone(),
        prompt_flags: PromptFlags {
            skip_tests: options.skip_tests,
            skip_lint: options.skip_lint,
            browser_enabled: options.browser_enabled,
        },
        retry: options.retry,
        tmux: options.tmux,
        model_override: options.model_override.clone(),
    });

    let mut report = RunReport::default();
    let mut completed_branches: Vec<String> = Vec::new();
    let mut global_agent_num: u64 = 0;
    let mut failed_task_ids: HashSet<String> = HashSet::new();
    let mut iteration: u64 = 0;
    let mut completed_count: u64 = 0;
    let mut failed_count: u64 = 0;

    loop {
        if options.max_iterations > 0 && iteration >= options.max_iterations {
            notify::info(&format!(
                "stopping after {iteration} iteration(s) (limit reached)"
            ));
            break;
        }

        let selected = select_batch(source.as_ref()).await?;
        let batch: Vec<Task> = selected
            .iter()
            .filter(|t| !failed_task_ids.contains(&t.id))
            .cloned()
            .collect();
        let filtered_out = selected.len() - batch.len();

        if batch.is_empty() {
            if filtered_out > 0 {
                notify::attention(
                    "some tasks are still pending but previously failed; stopping",
                );
            } else {
                notify::success("all tasks complete");
            }
            break;
        }

        if iteration == 0 {
            let total = source.count_remaining().await?;
            registry.update_summary(SummaryPatch {
                total: Some(total),
                ..SummaryPatch::default()
            });
        }

        let batch: Vec<Task> = batch.into_iter().take(options.max_parallel).collect();
        iteration += 1;
        registry.update_summary(SummaryPatch {
            in_progress: Some(batch.len() as u64),
            ..SummaryPatch::default()
        });

        if options.dry_run {
            for task in &batch {
                notify::info(&format!("[dry-run] would run: {}", task.title));
            }
            if options.max_iterations == 0 {
                // Nothing ever completes in a dry run, so an
                // unbounded loop would replay this batch forever.
                notify::attention("dry run with no iteration limit; stopping after one batch");
                break;
            }
            continue;
        }

        notify::info(&format!(
            "batch {iteration}: launching {} agent(s)",
            batch.len()
        ));

        let first_agent_num = global_agent_num + 1;
        let mut handles = Vec::with_capacity(batch.len());
        for task in &batch {
            global_agent_num += 1;
            handles.push(tokio::spawn(run_agent(
                env.clone(),
                task.clone(),
                global_agent_num,
            )));
        }

        // Barrier: every agent terminates before any result is
        // processed.
        let mut runs: Vec<AgentRun> = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(run) => runs.push(run),
                Err(e) => runs.push(AgentRun {
                    task: batch[index].clone(),
                    agent_id: (first_agent_num + index as u64).to_string(),
                    workspace: None,
                    branch: None,
                    outcome: AgentOutcome::Error(format!("agent task aborted: {e}")),
                }),
            }
        }

        for run in runs {
            let success = run.outcome.is_success();

            if success {
                if let Err(e) = source.mark_complete(&run.task.id).await {
                    warn!("failed to mark task '{}' complete: {e:#}", run.task.id);
                }
                record_progress(&config, &format!("[x] {}", run.task.title));
                completed_count += 1;
                notify::success(&format!("completed: {}", run.task.title));
                if let Some(branch) = &run.branch {
                    if !branch.is_empty() {
                        completed_branches.push(branch.clone());
                    }
                }
            } else {
                let message = run
                    .outcome
                    .error_message()
                    .unwrap_or("unknown error")
                    .to_string();
                record_progress(
                    &config,
                    &format!("[!] {} failed: {message}", run.task.title),
                );
                failed_count += 1;
                failed_task_ids.insert(run.task.id.clone());
                notify::failure(&format!("failed: {} ({message})", run.task.title));
            }

            registry.update_summary(SummaryPatch {
                completed: Some(completed_count),
                failed: Some(failed_count),
                ..SummaryPatch::default()
            });

            if let Some(workspace) = &run.workspace {
                if options.tmux && !success {
                    notify::attention(&format!(
                        "workspace preserved for debugging: {}",
                        workspace.display()
                    ));
                } else {
                    let cleanup = provider
                        .cleanup(
                            workspace,
                            run.branch.as_deref().unwrap_or(""),
                            &options.work_dir,
                        )
                        .await;
                    match cleanup {
                        Ok(outcome) if outcome.left_in_place => notify::attention(&format!(
                            "workspace left in place (uncommitted changes): {}",
                            workspace.display()
                        )),
                        Ok(_) => {}
                        Err(e) => warn!("workspace cleanup failed: {e:#}"),
                    }
                }
            }
        }
    }

    registry.update_summary(SummaryPatch {
        in_progress: Some(0),
        ..SummaryPatch::default()
    });

    if !options.skip_merge && !options.dry_run && !completed_branches.is_empty() {
        report.merge = Some(
            merge::merge_branches(
                engine.as_ref(),
                &completed_branches,
                &base_branch,
                &options.work_dir,
            )
            .await,
        );
    }

    let current = Git::current_branch(&options.work_dir)
        .await
        .unwrap_or_default();
    if current != starting_branch {
        match Git::return_to_branch(&starting_branch, &options.work_dir).await {
            Ok(()) => notify::info(&format!("returned to branch '{starting_branch}'")),
            Err(e) => warn!("failed to return to '{starting_branch}': {e:#}"),
        }
    }

    report.iterations = iteration;
    report.completed = completed_count;
    report.failed = failed_count;
    report.completed_branches = completed_branches;
    Ok(report)
}

/// Pick the next batch. Sources that batch by parallel group get the
/// whole group of their next task; everything else hands over all
/// remaining tasks at once.
async fn select_batch(source: &dyn TaskSource) -> Result<Vec<Task>> {
    if source.supports_parallel_groups() {
        match source.next_task().await? {
            None => Ok(Vec::new()),
            Some(task) => {
                let group = source.parallel_group(&task.title).await?;
                if group > 0 {
                    let tasks = source.tasks_in_group(group).await?;
                    if tasks.is_empty() {
                        Ok(vec![task])
                    } else {
                        Ok(tasks)
                    }
                } else {
                    Ok(vec![task])
                }
            }
        }
    } else {
        source.all_tasks().await
    }
}

/// Append one outcome line to the progress log. Best-effort, like the
/// state file.
fn record_progress(config: &Config, line: &str) {
    let path = config.progress_file();
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "- {line}")
    })();

    if let Err(e) = result {
        warn!("failed to record progress: {e}");
    }
}
