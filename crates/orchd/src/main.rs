//! `orch`: run coding agents on tasks, each in its own git worktree.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use orch_agents::{AdapterTuning, AgentExecutorFactory};
use orch_core::config::{load_config_or_default, save_config, OrchConfig};
use orch_core::events::EventKind;
use orch_core::state::TaskStatus;
use orch_core::types::{ExecutorKind, LogType, MessageStatus, RepoId, Repository, TaskId};
use orch_core::validation::Validate;
use orch_git::{current_branch, GitCli};
use orch_notify::{BroadcastSink, EventSink, FanoutSink, TracingSink};
use orchd::{Collaborators, NewTask, SqliteStore, TaskOrchestrator, TaskStore};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

const DEFAULT_CONFIG_PATH: &str = "orch.toml";
const DEFAULT_SQLITE_PATH: &str = ".orch/state.sqlite";

#[derive(Parser)]
#[command(name = "orch", version, about = "Run coding agents on tasks in isolated git worktrees")]
struct Cli {
    /// Settings file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// State database.
    #[arg(long, global = true, default_value = DEFAULT_SQLITE_PATH)]
    db: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default settings file and create the state database.
    Init {
        /// Overwrite an existing settings file.
        #[arg(short, long)]
        force: bool,
    },
    /// Manage registered repositories.
    #[command(subcommand)]
    Repo(RepoCommand),
    /// Create and drive tasks.
    #[command(subcommand)]
    Task(TaskCommand),
}

#[derive(Subcommand)]
enum RepoCommand {
    /// Register a local git repository.
    Add {
        path: PathBuf,
        /// Repository id; defaults to the directory name.
        #[arg(long)]
        id: Option<String>,
        /// Defaults to the currently checked out branch.
        #[arg(long)]
        default_branch: Option<String>,
        #[arg(long)]
        setup_script: Option<String>,
        #[arg(long)]
        start_script: Option<String>,
        /// Runs in the worktree after each agent turn.
        #[arg(long)]
        stop_script: Option<String>,
        #[arg(long)]
        cleanup_script: Option<String>,
        /// Glob copied from the repository into new worktrees. Repeat for
        /// several patterns.
        #[arg(long = "copy-files", value_name = "GLOB")]
        copy_files: Vec<String>,
    },
    List,
}

#[derive(Subcommand)]
enum TaskCommand {
    Create {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// claude, codex, copilot or gemini.
        #[arg(long, default_value = "claude")]
        agent: ExecutorKind,
        #[arg(long)]
        branch: String,
        /// Defaults to the repository's default branch.
        #[arg(long)]
        base: Option<String>,
    },
    /// Start a TODO task and follow its output until it is ready for review.
    Start { id: String },
    /// Start another turn, optionally with a new instruction.
    Resume {
        id: String,
        #[arg(short, long)]
        message: Option<String>,
    },
    Pause { id: String },
    /// Mark a reviewed task done and remove its worktree and branch.
    Finish { id: String },
    /// Queue a follow-up instruction.
    Message { id: String, content: String },
    Diff { id: String },
    List,
}

#[tokio::main]
async fn main() {
    orchd::logging::init();
    if let Err(err) = run(Cli::parse()).await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, &cli.db, force),
        Command::Repo(command) => {
            let store = open_store(&cli.db)?;
            cmd_repo(&*store, command)
        }
        Command::Task(command) => {
            let app = App::open(&cli.config, &cli.db)?;
            cmd_task(&app, command).await
        }
    }
}

fn cmd_init(config_path: &Path, db_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!("{} already exists", config_path.display());
    } else {
        save_config(config_path, &OrchConfig::default())
            .with_context(|| format!("write {}", config_path.display()))?;
        println!("wrote {}", config_path.display());
    }
    open_store(db_path)?;
    println!("state database ready at {}", db_path.display());
    Ok(())
}

fn open_store(db_path: &Path) -> Result<Arc<SqliteStore>> {
    if let Some(parent) = db_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let store = SqliteStore::open(db_path)
        .with_context(|| format!("open state database {}", db_path.display()))?;
    store.migrate().context("migrate state database")?;
    Ok(Arc::new(store))
}

fn cmd_repo(store: &dyn TaskStore, command: RepoCommand) -> Result<()> {
    match command {
        RepoCommand::Add {
            path,
            id,
            default_branch,
            setup_script,
            start_script,
            stop_script,
            cleanup_script,
            copy_files,
        } => {
            let path = fs::canonicalize(&path)
                .with_context(|| format!("resolve repository path {}", path.display()))?;
            let default_branch = match default_branch {
                Some(branch) => branch,
                None => current_branch(&path, &GitCli::default())
                    .context("detect default branch")?,
            };
            let id = match id {
                Some(id) => id,
                None => path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .context("repository path has no directory name; pass --id")?,
            };

            let mut repository = Repository::new(RepoId::new(id), path, default_branch);
            repository.setup_script = setup_script;
            repository.start_script = start_script;
            repository.stop_script = stop_script;
            repository.cleanup_script = cleanup_script;
            repository.copy_files = copy_patterns(copy_files);
            store.save_repository(&repository)?;
            println!(
                "registered {} ({}, default branch {})",
                repository.id,
                repository.path.display(),
                repository.default_branch
            );
        }
        RepoCommand::List => {
            for repository in store.list_repositories()? {
                println!(
                    "{}\t{}\t{}",
                    repository.id,
                    repository.default_branch,
                    repository.path.display()
                );
            }
        }
    }
    Ok(())
}

/// Stored copy-files setting: one glob per line.
fn copy_patterns(patterns: Vec<String>) -> Option<String> {
    let patterns: Vec<String> = patterns
        .into_iter()
        .map(|pattern| pattern.trim().to_string())
        .filter(|pattern| !pattern.is_empty())
        .collect();
    (!patterns.is_empty()).then(|| patterns.join("\n"))
}

struct App {
    orchestrator: TaskOrchestrator,
    broadcast: BroadcastSink,
}

impl App {
    fn open(config_path: &Path, db_path: &Path) -> Result<Self> {
        let config = load_config_or_default(config_path)
            .with_context(|| format!("load {}", config_path.display()))?;
        for issue in config.validate() {
            warn!(code = issue.code, message = %issue.message, "config issue");
        }
        let store = open_store(db_path)?;

        let broadcast = BroadcastSink::default();
        let events: Arc<dyn EventSink> = Arc::new(FanoutSink::new(vec![
            Arc::new(broadcast.clone()),
            Arc::new(TracingSink),
        ]));
        let factory = AgentExecutorFactory::new(
            config.agents.clone(),
            AdapterTuning::from(&config.executor),
        );
        let ctx = Collaborators::new(store, Arc::new(config), Arc::new(factory), events);
        Ok(Self {
            orchestrator: TaskOrchestrator::new(ctx),
            broadcast,
        })
    }
}

async fn cmd_task(app: &App, command: TaskCommand) -> Result<()> {
    let orch = &app.orchestrator;
    match command {
        TaskCommand::Create {
            repo,
            title,
            description,
            agent,
            branch,
            base,
        } => {
            let task = orch.create_task(NewTask {
                repository_id: RepoId::new(repo),
                title,
                description,
                executor_kind: agent,
                branch_name: branch,
                base_branch: base,
            })?;
            println!("{}", task.id);
        }
        TaskCommand::Start { id } => {
            let task_id = TaskId::new(id);
            let events = app.broadcast.subscribe();
            let task = orch.start(&task_id).await?;
            if let Some(worktree) = &task.worktree_path {
                eprintln!("worktree: {}", worktree.display());
            }
            follow(orch, &task_id, events).await?;
        }
        TaskCommand::Resume { id, message } => {
            let task_id = TaskId::new(id);
            let events = app.broadcast.subscribe();
            orch.resume(&task_id, message).await?;
            follow(orch, &task_id, events).await?;
        }
        TaskCommand::Pause { id } => {
            let task = orch.pause(&TaskId::new(id)).await?;
            println!("{} paused ({})", task.id, task.status);
        }
        TaskCommand::Finish { id } => {
            let task = orch.finish(&TaskId::new(id)).await?;
            orch.wait_background().await;
            println!("{} {}", task.id, task.status);
        }
        TaskCommand::Message { id, content } => {
            let task_id = TaskId::new(id);
            let events = app.broadcast.subscribe();
            let message = orch.queue_message(&task_id, &content).await?;
            match message.status {
                MessageStatus::Delivered => follow(orch, &task_id, events).await?,
                _ => println!("queued {} for {}", message.id, task_id),
            }
        }
        TaskCommand::Diff { id } => {
            print!("{}", orch.task_diff(&TaskId::new(id))?);
        }
        TaskCommand::List => {
            for task in orch.list_tasks()? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    task.id, task.status, task.executor_kind, task.branch_name, task.title
                );
            }
        }
    }
    Ok(())
}

/// Print the task's execution logs until it reaches review. Ctrl-C pauses
/// the task instead.
async fn follow(
    orch: &TaskOrchestrator,
    task_id: &TaskId,
    mut events: tokio::sync::broadcast::Receiver<orch_core::events::Event>,
) -> Result<()> {
    loop {
        let event = tokio::select! {
            received = events.recv() => received,
            signal = tokio::signal::ctrl_c() => {
                signal.context("listen for ctrl-c")?;
                orch.pause(task_id).await?;
                orch.shutdown().await;
                bail!("interrupted; task {task_id} paused");
            }
        };

        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "output subscriber fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if event.task_id.as_ref() != Some(task_id) {
            continue;
        }
        match event.kind {
            EventKind::ExecutionLog { log } => match log.log_type {
                LogType::Stderr => eprintln!("{}", log.content),
                LogType::Stdout => println!("{}", log.content),
                LogType::System => println!("[system] {}", log.content),
            },
            EventKind::TaskStatusChanged {
                to: TaskStatus::InReview,
                ..
            } => {
                println!("{task_id} is ready for review");
                break;
            }
            _ => {}
        }
    }
    orch.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use orch_scripts::{matches_any, parse_patterns};

    use super::{copy_patterns, Cli, Command, RepoCommand};

    #[test]
    fn repeated_copy_files_flags_become_one_pattern_per_line() {
        let cli = Cli::try_parse_from([
            "orch",
            "repo",
            "add",
            ".",
            "--copy-files",
            ".env",
            "--copy-files",
            "config/*.toml",
        ])
        .expect("parse");
        let Command::Repo(RepoCommand::Add { copy_files, .. }) = cli.command else {
            panic!("expected repo add");
        };

        let stored = copy_patterns(copy_files).expect("patterns");
        assert_eq!(stored, ".env\nconfig/*.toml");
        let patterns = parse_patterns(&stored);
        assert!(matches_any(&patterns, ".env"));
        assert!(matches_any(&patterns, "config/app.toml"));
    }

    #[test]
    fn no_copy_files_flag_stores_nothing() {
        assert_eq!(copy_patterns(Vec::new()), None);
        assert_eq!(copy_patterns(vec!["  ".to_string()]), None);
    }
}
