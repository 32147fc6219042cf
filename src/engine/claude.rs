//! Claude Code engine plug-in.
//!
//! Drives the `claude` CLI in non-interactive mode with stream-JSON
//! output. Streamed records double as progress signal (step labels)
//! and accounting source (tokens, cost, errors).

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use super::stream::StreamOutcome;
use super::{Engine, EngineOptions, EngineResult, ProgressCallback};
use crate::process::{self, ExecOptions, LineCallback};

pub struct ClaudeEngine;

impl ClaudeEngine {
    fn build_args(prompt: &str, options: &EngineOptions) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--dangerously-skip-permissions".to_string(),
        ];
        if let Some(model) = &options.model_override {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }

    fn build_result(outcome: StreamOutcome, exit_code: i32, stderr: &str) -> EngineResult {
        let success = exit_code == 0 && outcome.error.is_none();
        let error = if success {
            None
        } else {
            Some(outcome.error.clone().unwrap_or_else(|| {
                let detail = stderr.trim();
                if detail.is_empty() {
                    format!("claude exited with status {exit_code}")
                } else {
                    format!("claude exited with status {exit_code}: {detail}")
                }
            }))
        };

        EngineResult {
            success,
            response: outcome
                .response
                .unwrap_or_else(|| "Task completed".to_string()),
            input_tokens: outcome.input_tokens,
            output_tokens: outcome.output_tokens,
            cost: outcome.cost,
            error,
        }
    }
}

#[async_trait]
impl Engine for ClaudeEngine {
    fn name(&self) -> &'static str {
        "Claude Code"
    }

    fn command(&self) -> &'static str {
        "claude"
    }

    async fn execute(
        &self,
        prompt: &str,
        work_dir: &Path,
        options: &EngineOptions,
    ) -> Result<EngineResult> {
        let args = Self::build_args(prompt, options);
        let exec_options = ExecOptions {
            tmux: options.tmux,
            agent_id: options.agent_id.clone(),
            task_slug: options.task_slug.clone(),
            on_progress: options.on_progress.clone(),
        };

        let output = process::execute(self.command(), &args, work_dir, None, &exec_options).await?;
        let outcome = StreamOutcome::from_transcript(&output.stdout);
        Ok(Self::build_result(outcome, output.exit_code, &output.stderr))
    }

    async fn execute_streaming(
        &self,
        prompt: &str,
        work_dir: &Path,
        on_progress: ProgressCallback,
        options: &EngineOptions,
    ) -> Result<EngineResult> {
        if options.tmux {
            // The tmux driver already streams; route through execute
            // so session bookkeeping stays in one place.
            let mut options = options.clone();
            options.on_progress = Some(on_progress);
            return self.execute(prompt, work_dir, &options).await;
        }

        let args = Self::build_args(prompt, options);
        let outcome = Arc::new(Mutex::new(StreamOutcome::default()));

        let sink = outcome.clone();
        let on_line: LineCallback = Arc::new(move |line: &str| {
            sink.lock().unwrap().feed(line);
            on_progress(line);
        });

        let exit_code =
            process::execute_streaming(self.command(), &args, work_dir, on_line, None).await?;

        let outcome = outcome.lock().unwrap().clone();
        Ok(Self::build_result(outcome, exit_code, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_include_stream_json_and_prompt() {
        let args = ClaudeEngine::build_args("do the task", &EngineOptions::default());
        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "do the task");
        assert!(args.contains(&"stream-json".to_string()));
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(!args.contains(&"--model".to_string()));
    }

    #[test]
    fn model_override_appends_flag() {
        let options = EngineOptions {
            model_override: Some("opus".to_string()),
            ..EngineOptions::default()
        };
        let args = ClaudeEngine::build_args("x", &options);
        let pos = args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(args[pos + 1], "opus");
    }

    #[test]
    fn zero_exit_with_error_record_is_failure() {
        let mut outcome = StreamOutcome::default();
        outcome.feed(r#"{"type":"error","error":{"message":"overloaded"}}"#);
        let result = ClaudeEngine::build_result(outcome, 0, "");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("overloaded"));
    }

    #[test]
    fn nonzero_exit_without_record_reports_status() {
        let result = ClaudeEngine::build_result(StreamOutcome::default(), 2, "boom\n");
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("claude exited with status 2: boom")
        );
    }

    #[test]
    fn clean_run_carries_tokens_and_response() {
        let mut outcome = StreamOutcome::default();
        outcome.feed(r#"{"type":"result","result":"ok","usage":{"input_tokens":10,"output_tokens":20}}"#);
        let result = ClaudeEngine::build_result(outcome, 0, "");
        assert!(result.success);
        assert_eq!(result.response, "ok");
        assert_eq!(result.input_tokens, 10);
        assert_eq!(result.output_tokens, 20);
        assert!(result.error.is_none());
    }
}
