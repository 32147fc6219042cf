//! Polling tmux variant of the process driver.
//!
//! Instead of holding the child's pipes, the command runs inside a
//! detached tmux session that tees its merged output into a file and
//! writes its exit status into a sibling file. The driver polls both
//! files at 1 Hz. On a non-zero exit the session prints a debug
//! banner and stays alive so a human can `tmux attach` and inspect
//! the failed agent; foreman never kills it from the polling loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use super::{LineCallback, ProcessOutput};
use crate::config;

#[derive(Error, Debug)]
pub enum TmuxError {
    #[error("tmux is not installed or not in PATH")]
    NotInstalled,

    #[error("failed to create session '{0}': {1}")]
    SessionCreationFailed(String, String),

    #[error("tmux command failed: {0}")]
    CommandFailed(String),

    #[error("failed to prepare session files: {0}")]
    Io(#[from] std::io::Error),
}

/// Derive the session name for an agent: `foreman-<agentId>-<taskSlug>`,
/// lower-cased, with every character outside `[A-Za-z0-9-]` replaced
/// by `-`.
pub fn session_name(agent_id: &str, task_slug: &str) -> String {
    let raw = format!("{}-{}-{}", config::SESSION_PREFIX, agent_id, task_slug);
    raw.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Quote an argument for a POSIX shell: single quotes, with embedded
/// single quotes escaped as `'\''`.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

async fn run_tmux(args: &[&str]) -> Result<std::process::Output, TmuxError> {
    Command::new("tmux").args(args).output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TmuxError::NotInstalled
        } else {
            TmuxError::CommandFailed(e.to_string())
        }
    })
}

/// Check whether a session exists (exact-name match).
pub async fn session_exists(name: &str) -> Result<bool, TmuxError> {
    let target = format!("={name}");
    match run_tmux(&["has-session", "-t", &target]).await {
        Ok(out) => Ok(out.status.success()),
        Err(TmuxError::NotInstalled) => Err(TmuxError::NotInstalled),
        Err(_) => Ok(false),
    }
}

/// Best-effort session kill, usable from signal handlers.
pub fn kill_session_blocking(name: &str) {
    let _ = std::process::Command::new("tmux")
        .args(["kill-session", "-t", name])
        .output();
}

/// Paths of the per-session output and exit files.
fn session_files(workspace: &Path, session: &str) -> (PathBuf, PathBuf) {
    let tmp = config::workspace_tmp_dir(workspace);
    (
        tmp.join(format!("{session}.out")),
        tmp.join(format!("{session}.exit")),
    )
}

/// Build the shell script the detached session runs. The command's
/// merged output is teed into `out_file`, its exit status lands in
/// `exit_file`, and a non-zero status keeps the session alive behind
/// a debug banner until a human closes it.
fn session_script(command_line: &str, out_file: &Path, exit_file: &Path) -> String {
    let out = shell_quote(&out_file.to_string_lossy());
    let exit = shell_quote(&exit_file.to_string_lossy());
    format!(
        "{{ {command_line} 2>&1; echo \"$?\" > {exit}; }} | tee {out}; \
         status=\"$(cat {exit} 2>/dev/null || echo 1)\"; \
         if [ \"$status\" -ne 0 ]; then \
         printf '\\n[foreman] agent command exited with status %s\\n' \"$status\"; \
         printf '[foreman] session left open for inspection; press enter to close\\n'; \
         read _unused; fi"
    )
}

/// Run a command inside a detached tmux session and poll its output
/// and exit files at 1 Hz. New output is streamed line-by-line to
/// `on_progress`. Returns the full merged output as stdout (stderr is
/// empty, output was merged). A session that disappears without
/// writing an exit file yields exit code 1.
pub async fn execute_in_session(
    command: &str,
    args: &[String],
    work_dir: &Path,
    agent_id: &str,
    task_slug: &str,
    on_progress: Option<LineCallback>,
) -> Result<ProcessOutput, TmuxError> {
    let session = session_name(agent_id, task_slug);
    let (out_file, exit_file) = session_files(work_dir, &session);

    tokio::fs::create_dir_all(config::workspace_tmp_dir(work_dir)).await?;
    let _ = tokio::fs::remove_file(&out_file).await;
    let _ = tokio::fs::remove_file(&exit_file).await;

    let command_line = std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ");
    let script = session_script(&command_line, &out_file, &exit_file);

    let work_dir_str = work_dir.to_string_lossy();
    let created = run_tmux(&[
        "new-session",
        "-d",
        "-s",
        &session,
        "-c",
        &work_dir_str,
        &script,
    ])
    .await?;
    if !created.status.success() {
        let stderr = String::from_utf8_lossy(&created.stderr).to_string();
        return Err(TmuxError::SessionCreationFailed(session, stderr));
    }

    tracing::debug!(%session, "tmux session started");

    let mut offset = 0usize;
    let mut carry = String::new();
    let exit_code = loop {
        tokio::time::sleep(Duration::from_secs(1)).await;

        offset = drain_new_output(&out_file, offset, &mut carry, on_progress.as_ref()).await;

        if let Some(code) = read_exit_file(&exit_file).await {
            drain_new_output(&out_file, offset, &mut carry, on_progress.as_ref()).await;
            break code;
        }

        if !session_exists(&session).await.unwrap_or(false) {
            drain_new_output(&out_file, offset, &mut carry, on_progress.as_ref()).await;
            break read_exit_file(&exit_file).await.unwrap_or(1);
        }
    };

    let tail = carry.trim();
    if !tail.is_empty() {
        if let Some(cb) = &on_progress {
            cb(tail);
        }
    }

    let stdout = tokio::fs::read_to_string(&out_file).await.unwrap_or_default();

    Ok(ProcessOutput {
        stdout,
        stderr: String::new(),
        exit_code,
    })
}

/// Stream bytes past `offset` from the output file as lines. Partial
/// trailing lines stay in `carry` until more bytes arrive.
async fn drain_new_output(
    out_file: &Path,
    offset: usize,
    carry: &mut String,
    on_progress: Option<&LineCallback>,
) -> usize {
    let Ok(bytes) = tokio::fs::read(out_file).await else {
        return offset;
    };
    if bytes.len() <= offset {
        return offset;
    }

    carry.push_str(&String::from_utf8_lossy(&bytes[offset..]));
    while let Some(pos) = carry.find('\n') {
        let line: String = carry.drain(..=pos).collect();
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            if let Some(cb) = on_progress {
                cb(trimmed);
            }
        }
    }

    bytes.len()
}

/// The exit file terminates polling only once it exists and parses as
/// an integer; a half-written file is picked up on the next tick.
async fn read_exit_file(exit_file: &Path) -> Option<i32> {
    let contents = tokio::fs::read_to_string(exit_file).await.ok()?;
    contents.trim().parse().ok()
}
