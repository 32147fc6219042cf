//! Post-batch merge pipeline.
//!
//! Strictly sequential: completed branches merge into the base branch
//! in the order they were produced. Conflicts are not errors; the
//! conflicted file list goes to the engine for resolution, and only
//! an unresolved conflict aborts that branch's merge. Merged branches
//! are deleted; failed ones are kept for manual review.

use std::path::Path;

use tracing::{error, warn};

use crate::engine::{Engine, EngineOptions};
use crate::git::Git;
use crate::notify;
use crate::prompt::build_conflict_prompt;

/// What happened to each branch.
#[derive(Debug, Default)]
pub struct MergeReport {
    pub merged: Vec<String>,
    pub failed: Vec<String>,
}

/// Merge `branches` into `target` on the main working tree.
pub async fn merge_branches(
    engine: &dyn Engine,
    branches: &[String],
    target: &str,
    work_dir: &Path,
) -> MergeReport {
    let mut report = MergeReport::default();

    notify::info(&format!(
        "merging {} branch(es) into '{target}'",
        branches.len()
    ));

    for branch in branches {
        match Git::merge_agent_branch(branch, target, work_dir).await {
            Ok(outcome) if outcome.success => {
                notify::success(&format!("merged '{branch}'"));
                report.merged.push(branch.clone());
            }
            Ok(outcome) if outcome.has_conflicts => {
                notify::attention(&format!(
                    "'{branch}' conflicts in {} file(s), asking the engine to resolve",
                    outcome.conflicted_files.len()
                ));
                if resolve_conflicts(engine, branch, target, &outcome.conflicted_files, work_dir)
                    .await
                {
                    notify::success(&format!("merged '{branch}' after conflict resolution"));
                    report.merged.push(branch.clone());
                } else {
                    if let Err(e) = Git::abort_merge(work_dir).await {
                        warn!("failed to abort merge of '{branch}': {e}");
                    }
                    notify::failure(&format!("could not resolve conflicts on '{branch}'"));
                    report.failed.push(branch.clone());
                }
            }
            Ok(outcome) => {
                error!(
                    "merge of '{branch}' failed: {}",
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
                report.failed.push(branch.clone());
            }
            Err(e) => {
                error!("merge of '{branch}' failed: {e:#}");
                report.failed.push(branch.clone());
            }
        }
    }

    for branch in &report.merged {
        if let Err(e) = Git::delete_local_branch(branch, work_dir, true).await {
            warn!("failed to delete merged branch '{branch}': {e}");
        }
    }

    notify::info(&format!(
        "merge finished: {} merged, {} failed",
        report.merged.len(),
        report.failed.len()
    ));
    if !report.failed.is_empty() {
        notify::attention(&format!(
            "kept for manual review: {}",
            report.failed.join(", ")
        ));
    }

    report
}

/// Hand the conflict to the engine and verify it actually concluded
/// the merge. An engine that resolved the markers but stopped short
/// of committing gets its merge committed here.
async fn resolve_conflicts(
    engine: &dyn Engine,
    branch: &str,
    target: &str,
    conflicted_files: &[String],
    work_dir: &Path,
) -> bool {
    let prompt = build_conflict_prompt(branch, target, conflicted_files);

    let result = match engine
        .execute(&prompt, work_dir, &EngineOptions::default())
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!("conflict resolution for '{branch}' errored: {e:#}");
            return false;
        }
    };
    if !result.success {
        error!(
            "conflict resolution for '{branch}' failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        return false;
    }

    match Git::conflicted_files(work_dir).await {
        Ok(remaining) if remaining.is_empty() => {
            if Git::merge_in_progress(work_dir).await {
                if let Err(e) = Git::commit_merge(work_dir).await {
                    error!("failed to conclude merge of '{branch}': {e}");
                    return false;
                }
            }
            true
        }
        Ok(remaining) => {
            error!(
                "'{branch}' still has {} conflicted file(s) after resolution",
                remaining.len()
            );
            false
        }
        Err(e) => {
            error!("could not inspect conflicts for '{branch}': {e}");
            false
        }
    }
}
