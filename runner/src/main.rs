//! CLI for the long-horizon Taskmaster runner.
//!
//! `init` prepares the session assets, `run` drives tasks to completion, and
//! `status` prints the checkpoint summary. Knobs come from
//! `<session>/config.toml` with CLI flags taking precedence.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use tm_longrun::core::clock::SystemClock;
use tm_longrun::core::types::{AgentsMode, ReasoningEffort, RunMode, Task};
use tm_longrun::exit_codes;
use tm_longrun::io::assets::{InitOptions, NoRemoteFetcher, init_assets};
use tm_longrun::io::checkpoint_store::load_checkpoint;
use tm_longrun::io::config::{RunnerConfig, load_config};
use tm_longrun::io::executor::{CodexExecutor, ExecConfig};
use tm_longrun::io::ledger::read_entries;
use tm_longrun::io::paths::{PathOptions, SESSION_DIR, SessionPaths};
use tm_longrun::io::task_file::{FileTaskStore, default_task_file};
use tm_longrun::logging;
use tm_longrun::run::{FinalStatus, RunObserver, RunOptions, TaskEndSummary, run};

#[derive(Parser)]
#[command(
    name = "tm-longrun",
    version,
    about = "Drive Taskmaster tasks to completion, one agent invocation per task"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ensure the session directory, hook block, and skill files exist.
    Init(InitArgs),
    /// Run tasks until completion, a stop condition, or a failure.
    Run(RunArgs),
    /// Print the checkpoint and ledger summary.
    Status(SharedArgs),
}

#[derive(Args)]
struct SharedArgs {
    /// Project root.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Plan schema and layout: lite, full, or auto.
    #[arg(long)]
    mode: Option<RunMode>,
    /// Agent-context file override.
    #[arg(long)]
    agents_file: Option<PathBuf>,
    /// Skill file override.
    #[arg(long)]
    skill_file: Option<PathBuf>,
    /// Session directory override.
    #[arg(long)]
    session_dir: Option<PathBuf>,
}

#[derive(Args)]
struct InitArgs {
    #[command(flatten)]
    shared: SharedArgs,
    /// Hookless agent-context handling: append, skip, or fail.
    #[arg(long)]
    agents_mode: Option<AgentsMode>,
    /// Skip remote template fetches; always use the built-in fallbacks.
    #[arg(long)]
    disable_remote: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    shared: SharedArgs,
    #[arg(long)]
    agents_mode: Option<AgentsMode>,
    #[arg(long)]
    disable_remote: bool,
    /// Taskmaster tag to run.
    #[arg(long)]
    tag: Option<String>,
    /// Task file override (default: .taskmaster/tasks/tasks.json).
    #[arg(long)]
    task_file: Option<PathBuf>,
    /// Agent executable.
    #[arg(long)]
    executor: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Reasoning effort: low, medium, high, or xhigh.
    #[arg(long)]
    reasoning_effort: Option<ReasoningEffort>,
    /// Retries after the first failed attempt.
    #[arg(long)]
    max_retries: Option<u32>,
    /// Stop after this many executor invocations.
    #[arg(long)]
    max_tasks: Option<u32>,
    #[arg(long)]
    continue_on_failure: Option<bool>,
    /// Idle timeout in milliseconds; <= 0 disables it.
    #[arg(long)]
    exec_idle_timeout_ms: Option<i64>,
    /// Absolute per-attempt cap in milliseconds.
    #[arg(long, alias = "exec-timeout-ms")]
    exec_hard_timeout_ms: Option<i64>,
    #[arg(long)]
    terminate_on_result: Option<bool>,
    #[arg(long)]
    full_auto: Option<bool>,
    #[arg(long)]
    skip_git_repo_check: Option<bool>,
}

fn main() -> ExitCode {
    logging::init();
    match dispatch() {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(exit_codes::ERROR as u8)
        }
    }
}

fn dispatch() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init(args) => cmd_init(args),
        Command::Run(args) => cmd_run(args),
        Command::Status(args) => cmd_status(args),
    }
}

/// Resolve root, load the session config, and build the path set. Flags win
/// over config fields.
fn setup(shared: &SharedArgs) -> Result<(RunnerConfig, SessionPaths)> {
    let root = fs::canonicalize(&shared.root)
        .with_context(|| format!("resolve project root {}", shared.root.display()))?;
    let session_dir = match &shared.session_dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => root.join(dir),
        None => root.join(SESSION_DIR),
    };
    let config = load_config(&session_dir.join("config.toml"))?;
    let mode = shared.mode.unwrap_or(config.mode);
    let paths = SessionPaths::resolve(&PathOptions {
        root,
        mode,
        agents_file: shared.agents_file.clone(),
        skill_file: shared.skill_file.clone(),
        session_dir: shared.session_dir.clone(),
    });
    Ok((config, paths))
}

fn cmd_init(args: InitArgs) -> Result<i32> {
    let (config, paths) = setup(&args.shared)?;
    let options = InitOptions {
        agents_mode: args.agents_mode.unwrap_or(config.agents_mode),
        disable_remote: args.disable_remote || config.disable_remote,
        fetcher: &NoRemoteFetcher,
    };
    let result = init_assets(&paths, &options)?;
    for (path, action) in &result.files {
        println!("{} {path}", action.as_str());
    }
    Ok(exit_codes::OK)
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let (config, paths) = setup(&args.shared)?;

    // Assets must exist before the first run; setup errors are fatal here.
    init_assets(
        &paths,
        &InitOptions {
            agents_mode: args.agents_mode.unwrap_or(config.agents_mode),
            disable_remote: args.disable_remote || config.disable_remote,
            fetcher: &NoRemoteFetcher,
        },
    )?;

    let exec_config = ExecConfig {
        executable: args.executor.unwrap_or(config.executor),
        model: args.model.or(config.model),
        reasoning_effort: args.reasoning_effort.or(config.reasoning_effort),
        full_auto: args.full_auto.unwrap_or(config.full_auto),
        skip_git_repo_check: args
            .skip_git_repo_check
            .unwrap_or(config.skip_git_repo_check),
        idle_timeout_ms: args
            .exec_idle_timeout_ms
            .unwrap_or(config.exec_idle_timeout_ms),
        hard_timeout_ms: args.exec_hard_timeout_ms.or(config.exec_hard_timeout_ms),
        terminate_on_result: args
            .terminate_on_result
            .unwrap_or(config.terminate_on_result),
    };
    let options = RunOptions {
        max_retries: args.max_retries.unwrap_or(config.max_retries),
        max_tasks: args.max_tasks.or(config.max_tasks),
        continue_on_failure: args
            .continue_on_failure
            .unwrap_or(config.continue_on_failure),
    };

    let task_file = args
        .task_file
        .map(|path| {
            if path.is_absolute() {
                path
            } else {
                paths.root.join(path)
            }
        })
        .unwrap_or_else(|| default_task_file(&paths.root));
    let store = FileTaskStore::new(task_file, args.tag.or(config.tag));
    let executor = CodexExecutor::new(exec_config);

    let result = run(
        &store,
        &executor,
        &paths,
        &options,
        &SystemClock,
        &ConsoleObserver,
    )?;

    println!(
        "done={} blocked={} runs={} status={}",
        result.completed_task_ids.len(),
        result.blocked_task_ids.len(),
        result.total_runs,
        result.final_status.as_str()
    );
    if let Some(message) = &result.error_message {
        eprintln!("{message}");
    }
    Ok(match result.final_status {
        FinalStatus::AllComplete => exit_codes::OK,
        FinalStatus::Partial => exit_codes::PARTIAL,
        FinalStatus::Error => exit_codes::ERROR,
    })
}

fn cmd_status(args: SharedArgs) -> Result<i32> {
    let (_, paths) = setup(&args)?;
    let checkpoint = load_checkpoint(&paths.checkpoint_file)?;
    let entries = read_entries(&paths.ledger_file)?;

    println!("updated:  {}", or_dash(&checkpoint.updated_at));
    println!(
        "last:     {}",
        checkpoint.last_task_id.as_deref().unwrap_or("-")
    );
    println!("done:     {}", checkpoint.done_task_ids.join(", "));
    println!("blocked:  {}", checkpoint.blocked_task_ids.join(", "));
    println!("attempts: {}", entries.len());
    for (id, count) in &checkpoint.attempts {
        println!("  {id}: {count}");
    }
    Ok(exit_codes::OK)
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

/// Default observer: one stderr line per lifecycle event. Agent output itself
/// is already teed by the executor.
struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn on_task_start(&self, task: &Task, attempt: u32) {
        eprintln!("[tm-longrun] task {} '{}' attempt {attempt}", task.id, task.title);
    }

    fn on_task_end(&self, summary: &TaskEndSummary) {
        eprintln!(
            "[tm-longrun] task {} -> {} after {}ms ({})",
            summary.task_id,
            summary.status.as_str(),
            summary.duration_ms,
            summary.note
        );
    }

    fn on_info(&self, message: &str) {
        eprintln!("[tm-longrun] {message}");
    }

    fn on_warning(&self, message: &str) {
        eprintln!("[tm-longrun] warning: {message}");
    }
}
