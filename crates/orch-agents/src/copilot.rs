//! Copilot CLI: plain-text output, prompt on stdin, and a session id that
//! only shows up as a log file name inside the run's log directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use orch_core::types::{ExecutorKind, LogType};
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ansi::strip_ansi;
use crate::control::RunControl;
use crate::error::ExecutorError;
use crate::executor::Executor;
use crate::process::{pump_lines, spawn_agent, write_line, AgentProcess, LineHandler, SpawnSpec, StreamLine};
use crate::types::{AdapterTuning, ExecutorConfig, ExecutorRun};

#[derive(Debug)]
pub struct CopilotAdapter {
    binary: PathBuf,
    tuning: AdapterTuning,
    log_root: PathBuf,
    control: Arc<RunControl>,
    watch: CancellationToken,
}

impl CopilotAdapter {
    pub fn new(binary: impl Into<PathBuf>, tuning: AdapterTuning) -> Self {
        let control = Arc::new(RunControl::new(ExecutorKind::Copilot));
        let watch = control.kill_token().child_token();
        Self {
            binary: binary.into(),
            tuning,
            log_root: std::env::temp_dir().join("orch-copilot-logs"),
            control,
            watch,
        }
    }

    /// Directory under which each run gets its own log directory.
    pub fn with_log_root(mut self, log_root: impl Into<PathBuf>) -> Self {
        self.log_root = log_root.into();
        self
    }

    pub fn command_args(log_dir: &Path, session_id: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "--log-dir".to_string(),
            log_dir.display().to_string(),
            "--log-level".to_string(),
            "debug".to_string(),
            "--allow-all-tools".to_string(),
        ];
        if let Some(session_id) = session_id {
            args.push("--resume".to_string());
            args.push(session_id.to_string());
        }
        args
    }
}

#[async_trait]
impl Executor for CopilotAdapter {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Copilot
    }

    async fn start(&self, config: ExecutorConfig) -> Result<ExecutorRun, ExecutorError> {
        let events = self.control.begin()?;

        let log_dir = self.log_root.join(Uuid::new_v4().to_string());
        if let Err(source) = fs::create_dir_all(&log_dir) {
            self.control.stop();
            return Err(ExecutorError::Prepare {
                path: log_dir,
                source,
            });
        }

        let spec = SpawnSpec::new(&self.binary, &config.working_directory)
            .args(Self::command_args(&log_dir, config.session_id.as_deref()));
        let AgentProcess {
            mut stdin,
            lines,
            exit,
            pid,
        } = match spawn_agent(&spec, self.control.kill_token()) {
            Ok(process) => process,
            Err(err) => {
                self.control.stop();
                return Err(err);
            }
        };

        if let Err(source) = write_line(&mut stdin, &config.prompt).await {
            self.control.stop();
            return Err(ExecutorError::Stdin { source });
        }
        drop(stdin);
        info!(task_id = %config.task_id, pid = ?pid, log_dir = %log_dir.display(), "copilot started");

        tokio::spawn(watch_session(
            log_dir,
            Arc::clone(&self.control),
            self.watch.clone(),
            self.tuning.clone(),
        ));

        let control = Arc::clone(&self.control);
        let grace = self.tuning.drain_grace;
        let mut handler = CopilotStream {
            control: Arc::clone(&control),
            watch: self.watch.clone(),
        };
        tokio::spawn(async move {
            pump_lines(lines, exit, &control, grace, &mut handler).await;
        });

        Ok(ExecutorRun { events })
    }

    async fn stop(&self) {
        self.watch.cancel();
        if self.control.stop() {
            debug!("copilot stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.control.is_running()
    }
}

struct CopilotStream {
    control: Arc<RunControl>,
    watch: CancellationToken,
}

#[async_trait]
impl LineHandler for CopilotStream {
    async fn handle_line(&mut self, line: StreamLine) -> bool {
        let text = strip_ansi(&line.text);
        if !text.trim().is_empty() {
            self.control.output(line.stream, text);
        }
        false
    }

    async fn on_exit(&mut self) {
        self.watch.cancel();
    }
}

fn session_log_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:session-)?([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\.log$",
        )
        .ok()
    })
    .as_ref()
}

/// Session id carried by a Copilot log file name, if any.
pub fn session_from_file_name(name: &str) -> Option<&str> {
    session_log_regex()?
        .captures(name)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str())
}

fn scan_for_session(dir: &Path) -> Option<String> {
    let entries = fs::read_dir(dir).ok()?;
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
        .iter()
        .find_map(|name| session_from_file_name(name).map(str::to_string))
}

/// Report the first session log that appears in `dir`, at most once. File
/// system events trigger a rescan; a periodic rescan covers missed events.
async fn watch_session(
    dir: PathBuf,
    control: Arc<RunControl>,
    cancel: CancellationToken,
    tuning: AdapterTuning,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            let _ = tx.send(());
        }
    })
    .and_then(|mut watcher: RecommendedWatcher| {
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    });
    let _watcher = match watcher {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            warn!(error = %err, dir = %dir.display(), "copilot log watcher unavailable, polling only");
            None
        }
    };

    let deadline = tokio::time::sleep(tuning.session_watch_timeout);
    tokio::pin!(deadline);
    let mut rescan = tokio::time::interval(tuning.session_poll_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = &mut deadline => {
                debug!(dir = %dir.display(), "no copilot session log before timeout");
                return;
            }
            _ = rescan.tick() => {}
            Some(()) = rx.recv() => {}
        }

        if let Some(session_id) = scan_for_session(&dir) {
            info!(%session_id, "copilot session discovered");
            control.session(session_id);
            return;
        }
    }
}
