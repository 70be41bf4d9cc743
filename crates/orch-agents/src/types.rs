use std::path::PathBuf;
use std::time::Duration;

use orch_core::config::ExecutorTuning;
use orch_core::types::LogType;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Everything an adapter needs for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Owner of the run (task or epic id); only used for logging.
    pub task_id: String,
    pub working_directory: PathBuf,
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ExecutorConfig {
    pub fn new(
        task_id: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            working_directory: working_directory.into(),
            prompt: prompt.into(),
            session_id: None,
        }
    }

    pub fn resuming(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorOutput {
    pub content: String,
    pub log_type: LogType,
}

impl ExecutorOutput {
    pub fn new(log_type: LogType, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            log_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorEvent {
    Output(ExecutorOutput),
    SessionId(String),
    /// Final event of a run that ended on its own. Never sent after `stop`.
    Exited(i32),
}

/// Receiving half of a started run.
#[derive(Debug)]
pub struct ExecutorRun {
    pub events: mpsc::UnboundedReceiver<ExecutorEvent>,
}

impl ExecutorRun {
    pub async fn next_event(&mut self) -> Option<ExecutorEvent> {
        self.events.recv().await
    }
}

/// Per-adapter runtime knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterTuning {
    pub request_timeout: Duration,
    pub session_watch_timeout: Duration,
    pub session_poll_interval: Duration,
    pub drain_grace: Duration,
}

impl Default for AdapterTuning {
    fn default() -> Self {
        Self::from(&ExecutorTuning::default())
    }
}

impl From<&ExecutorTuning> for AdapterTuning {
    fn from(tuning: &ExecutorTuning) -> Self {
        Self {
            request_timeout: tuning.request_timeout(),
            session_watch_timeout: tuning.session_watch_timeout(),
            session_poll_interval: tuning.session_poll_interval(),
            drain_grace: tuning.drain_grace(),
        }
    }
}
