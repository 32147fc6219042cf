//! Child-process driver.
//!
//! Uses the tokio process API directly (rather than a shell) so agent
//! commands run with exact argument vectors. Streaming mode reads
//! stdout and stderr concurrently and delivers trimmed non-empty
//! lines to a callback; a multiplexer request in [`ExecOptions`]
//! transparently reroutes execution into a tmux session (see
//! [`tmux`]) so a human can attach to a failing agent.

pub mod tmux;

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Callback invoked once per streamed output line.
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read child output: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tmux(#[from] tmux::TmuxError),
}

/// Captured output of a finished child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Options recognized by [`execute`].
///
/// When `tmux` is set together with an agent id and task slug, the
/// command runs inside a detached tmux session instead of a direct
/// child process; `on_progress` then receives the session's merged
/// output line-by-line.
#[derive(Clone, Default)]
pub struct ExecOptions {
    pub tmux: bool,
    pub agent_id: Option<String>,
    pub task_slug: Option<String>,
    pub on_progress: Option<LineCallback>,
}

/// Resolve whether a command is discoverable on the executable search path.
pub fn exists(command: &str) -> bool {
    which::which(command).is_ok()
}

/// Run a command to completion and capture its output.
pub async fn execute(
    command: &str,
    args: &[String],
    work_dir: &Path,
    env: Option<&HashMap<String, String>>,
    options: &ExecOptions,
) -> Result<ProcessOutput, ProcessError> {
    if options.tmux {
        if let (Some(agent_id), Some(task_slug)) = (&options.agent_id, &options.task_slug) {
            return tmux::execute_in_session(
                command,
                args,
                work_dir,
                agent_id,
                task_slug,
                options.on_progress.clone(),
            )
            .await
            .map_err(ProcessError::from);
        }
    }

    let mut cmd = Command::new(command);
    cmd.args(args)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(env) = env {
        cmd.envs(env);
    }

    let output = cmd.output().await.map_err(|source| ProcessError::Spawn {
        command: command.to_string(),
        source,
    })?;

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Run a command, delivering each trimmed non-empty output line to
/// `on_line` as it arrives. Stdout and stderr are read concurrently;
/// lines from the two streams may interleave but each stream's lines
/// arrive in order. Trailing content without a terminating newline is
/// emitted as a final line.
pub async fn execute_streaming(
    command: &str,
    args: &[String],
    work_dir: &Path,
    on_line: LineCallback,
    env: Option<&HashMap<String, String>>,
) -> Result<i32, ProcessError> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(env) = env {
        cmd.envs(env);
    }

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        command: command.to_string(),
        source,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = stdout.map(|out| {
        let on_line = on_line.clone();
        tokio::spawn(async move { stream_lines(out, &on_line).await })
    });
    let stderr_task = stderr.map(|err| {
        let on_line = on_line.clone();
        tokio::spawn(async move { stream_lines(err, &on_line).await })
    });

    let status = child.wait().await?;

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    Ok(status.code().unwrap_or(-1))
}

async fn stream_lines<R: AsyncRead + Unpin>(reader: R, on_line: &LineCallback) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    on_line(trimmed);
                }
            }
        }
    }
}
