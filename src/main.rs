use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use foreman::agent::RequirementSource;
use foreman::config::Config;
use foreman::engine::{self, EngineKind};
use foreman::logging::init_logging;
use foreman::notify;
use foreman::process;
use foreman::retry::RetryPolicy;
use foreman::scheduler::{self, RunOptions};
use foreman::state::StateRegistry;
use foreman::tasks;
use foreman::workspace::WorktreeProvider;

/// Parallel AI-agent orchestrator: fan out coding agents over git
/// worktrees and merge the results.
#[derive(Parser)]
#[command(name = "foreman", version, about)]
struct Cli {
    /// Task backlog file (.yaml/.yml with parallel groups, or a .md checklist)
    #[arg(long, default_value = "tasks.yaml")]
    tasks: PathBuf,

    /// AI engine to drive
    #[arg(long, value_enum, default_value_t = EngineKind::Claude)]
    engine: EngineKind,

    /// Maximum number of agents in flight at once
    #[arg(long, default_value_t = 3)]
    max_parallel: usize,

    /// Stop after this many batches (0 = run until the backlog is drained)
    #[arg(long, default_value_t = 0)]
    max_iterations: u64,

    /// Branch to merge completed work into (defaults to the current branch)
    #[arg(long, default_value = "")]
    base_branch: String,

    /// Tell agents not to run tests
    #[arg(long)]
    skip_tests: bool,

    /// Tell agents not to run linters
    #[arg(long)]
    skip_lint: bool,

    /// Leave completed branches unmerged
    #[arg(long)]
    skip_merge: bool,

    /// Show the batches without launching agents
    #[arg(long)]
    dry_run: bool,

    /// Run each agent inside a tmux session you can attach to
    #[arg(long)]
    tmux: bool,

    /// Allow agents to use a browser for verification
    #[arg(long)]
    browser: bool,

    /// Model override passed through to the engine
    #[arg(long)]
    model: Option<String>,

    /// Additional attempts after a transient engine failure
    #[arg(long, default_value_t = 3)]
    max_retries: usize,

    /// Initial delay between retries, in seconds
    #[arg(long, default_value_t = 5)]
    retry_delay: u64,

    /// Working directory (defaults to the current directory)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let work_dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let work_dir = work_dir
        .canonicalize()
        .with_context(|| format!("working directory not found: {}", work_dir.display()))?;

    let engine = engine::create_engine(cli.engine);
    if !engine.is_available().await {
        bail!(
            "{} ('{}') is not on PATH; install it or pick another engine",
            engine.name(),
            engine.command()
        );
    }
    if cli.tmux && !process::exists("tmux") {
        bail!("--tmux requires tmux on PATH");
    }

    let tasks_path = if cli.tasks.is_absolute() {
        cli.tasks.clone()
    } else {
        work_dir.join(&cli.tasks)
    };
    if !tasks_path.exists() {
        bail!("task file not found: {}", tasks_path.display());
    }
    let source: Arc<dyn tasks::TaskSource> = Arc::from(tasks::source_for_path(&tasks_path)?);

    let registry = Arc::new(StateRegistry::new(&Config::new(&work_dir)));
    install_signal_handlers(registry.clone());

    let requirements = Some(RequirementSource {
        is_folder: tasks_path.is_dir(),
        path: tasks_path,
    });

    let options = RunOptions {
        work_dir,
        skip_tests: cli.skip_tests,
        skip_lint: cli.skip_lint,
        dry_run: cli.dry_run,
        max_iterations: cli.max_iterations,
        retry: RetryPolicy {
            max_retries: cli.max_retries,
            retry_delay: Duration::from_secs(cli.retry_delay),
        },
        base_branch: cli.base_branch,
        max_parallel: cli.max_parallel.max(1),
        requirements,
        browser_enabled: cli.browser,
        model_override: cli.model,
        skip_merge: cli.skip_merge,
        tmux: cli.tmux,
    };

    let report = scheduler::run(
        engine,
        source,
        Arc::new(WorktreeProvider),
        registry,
        options,
    )
    .await?;

    notify::info(&format!(
        "run finished: {} completed, {} failed over {} batch(es)",
        report.completed, report.failed, report.iterations
    ));

    Ok(())
}

/// Interrupt and terminate both tear down live tmux sessions and exit
/// cleanly.
fn install_signal_handlers(registry: Arc<StateRegistry>) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        notify::attention("shutting down, cleaning up tmux sessions");
        registry.cleanup_tmux_sessions();
        std::process::exit(0);
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = ctrl_c.await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
