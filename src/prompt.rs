//! Prompt assembly for agent launches.

use crate::tasks::Task;

/// Feature toggles threaded into the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptFlags {
    pub skip_tests: bool,
    pub skip_lint: bool,
    pub browser_enabled: bool,
}

/// Build the prompt for one task. The agent runs in an isolated
/// worktree, so the prompt insists on committing: uncommitted work
/// never reaches the merge pipeline.
pub fn build_prompt(task: &Task, flags: &PromptFlags) -> String {
    let mut steps = vec![
        "Read the relevant code before changing anything.".to_string(),
        format!(
            "Implement this task completely: {}. Requirement files copied \
             into this workspace describe the wider backlog; only this task \
             is yours.",
            task.title
        ),
    ];
    if !flags.skip_tests {
        steps.push("Run the project's tests and make them pass.".to_string());
    }
    if !flags.skip_lint {
        steps.push("Run the project's linter and fix anything it reports.".to_string());
    }
    steps.push(
        "Commit all of your work with a clear message. Do not leave \
         uncommitted changes."
            .to_string(),
    );

    let numbered: Vec<String> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {s}", i + 1))
        .collect();

    let browser_note = if flags.browser_enabled {
        "You may use a browser to verify your changes when that helps."
    } else {
        "Do not open a browser or start long-running dev servers."
    };

    format!(
        "You are working on one task from a development backlog.\n\n\
         Task: {title}\n\n\
         {steps}\n\n\
         {browser_note}\n\
         Work only inside the current directory.",
        title = task.title,
        steps = numbered.join("\n"),
    )
}

/// Prompt for resolving merge conflicts left by an agent branch.
pub fn build_conflict_prompt(branch: &str, target: &str, conflicted_files: &[String]) -> String {
    format!(
        "A merge of branch '{branch}' into '{target}' stopped on conflicts.\n\n\
         Conflicted files:\n{files}\n\n\
         For each file, resolve the conflict markers so that the intent of \
         both sides is preserved. Then stage the resolved files with \
         `git add` and conclude the merge with `git commit`. Do not abort \
         the merge and do not touch unrelated files.",
        files = conflicted_files
            .iter()
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}
