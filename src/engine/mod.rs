//! AI engine abstraction.
//!
//! An engine is a command-line assistant invoked as a child process.
//! The core is parametric over this trait; concrete engines are
//! plug-ins enumerated by [`EngineKind`].

pub mod claude;
pub mod stream;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::process;

/// Callback receiving each streamed output line.
pub type ProgressCallback = process::LineCallback;

/// Options recognized by engine execution.
#[derive(Clone, Default)]
pub struct EngineOptions {
    pub model_override: Option<String>,
    pub tmux: bool,
    pub agent_id: Option<String>,
    pub task_slug: Option<String>,
    pub on_progress: Option<ProgressCallback>,
}

/// Outcome of one engine invocation.
#[derive(Debug, Clone, Default)]
pub struct EngineResult {
    pub success: bool,
    pub response: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Option<f64>,
    pub error: Option<String>,
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Display name, e.g. "Claude Code".
    fn name(&self) -> &'static str;

    /// Executable name looked up on PATH.
    fn command(&self) -> &'static str;

    async fn is_available(&self) -> bool {
        process::exists(self.command())
    }

    /// Run a prompt to completion in `work_dir`.
    async fn execute(
        &self,
        prompt: &str,
        work_dir: &Path,
        options: &EngineOptions,
    ) -> Result<EngineResult>;

    /// Run a prompt, streaming output lines to `on_progress`. Engines
    /// without a native streaming mode fall back to blocking execution.
    async fn execute_streaming(
        &self,
        prompt: &str,
        work_dir: &Path,
        on_progress: ProgressCallback,
        options: &EngineOptions,
    ) -> Result<EngineResult> {
        let mut options = options.clone();
        options.on_progress = Some(on_progress);
        self.execute(prompt, work_dir, &options).await
    }
}

/// The engines foreman knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EngineKind {
    Claude,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claude => write!(f, "claude"),
        }
    }
}

pub fn create_engine(kind: EngineKind) -> Arc<dyn Engine> {
    match kind {
        EngineKind::Claude => Arc::new(claude::ClaudeEngine),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_produces_claude() {
        let engine = create_engine(EngineKind::Claude);
        assert_eq!(engine.name(), "Claude Code");
        assert_eq!(engine.command(), "claude");
    }
}
