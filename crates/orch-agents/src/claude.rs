//! Claude CLI in streaming JSON mode: one envelope in on stdin, one JSON
//! object per stdout line out, `type == "result"` marks the end of the turn.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use orch_core::types::{ExecutorKind, LogType};
use serde_json::{json, Value};
use tokio::process::ChildStdin;
use tracing::{debug, info};

use crate::control::RunControl;
use crate::error::ExecutorError;
use crate::executor::Executor;
use crate::process::{pump_lines, spawn_agent, write_line, LineHandler, SpawnSpec, StreamLine};
use crate::types::{AdapterTuning, ExecutorConfig, ExecutorRun};

const STREAM_ARGS: [&str; 7] = [
    "-p",
    "--output-format",
    "stream-json",
    "--input-format",
    "stream-json",
    "--verbose",
    "--dangerously-skip-permissions",
];

#[derive(Debug)]
pub struct ClaudeAdapter {
    binary: PathBuf,
    tuning: AdapterTuning,
    control: Arc<RunControl>,
}

impl ClaudeAdapter {
    pub fn new(binary: impl Into<PathBuf>, tuning: AdapterTuning) -> Self {
        Self {
            binary: binary.into(),
            tuning,
            control: Arc::new(RunControl::new(ExecutorKind::ClaudeCode)),
        }
    }

    pub fn command_args(session_id: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = STREAM_ARGS.iter().map(|arg| arg.to_string()).collect();
        if let Some(session_id) = session_id {
            args.push("--resume".to_string());
            args.push(session_id.to_string());
        }
        args
    }
}

/// The stdin message shape shared by stream-json agents.
pub fn user_message(prompt: &str) -> Value {
    json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": [{ "type": "text", "text": prompt }],
        },
    })
}

#[async_trait]
impl Executor for ClaudeAdapter {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::ClaudeCode
    }

    async fn start(&self, config: ExecutorConfig) -> Result<ExecutorRun, ExecutorError> {
        let events = self.control.begin()?;
        let spec = SpawnSpec::new(&self.binary, &config.working_directory)
            .args(Self::command_args(config.session_id.as_deref()));

        let mut process = match spawn_agent(&spec, self.control.kill_token()) {
            Ok(process) => process,
            Err(err) => {
                self.control.stop();
                return Err(err);
            }
        };

        if let Err(source) =
            write_line(&mut process.stdin, &user_message(&config.prompt).to_string()).await
        {
            self.control.stop();
            return Err(ExecutorError::Stdin { source });
        }
        info!(task_id = %config.task_id, pid = ?process.pid, resume = config.session_id.is_some(), "claude started");

        let control = Arc::clone(&self.control);
        let grace = self.tuning.drain_grace;
        tokio::spawn(async move {
            let mut handler = ClaudeStream {
                control: Arc::clone(&control),
                session_reported: false,
                _stdin: process.stdin,
            };
            pump_lines(process.lines, process.exit, &control, grace, &mut handler).await;
        });

        Ok(ExecutorRun { events })
    }

    async fn stop(&self) {
        if self.control.stop() {
            debug!("claude stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.control.is_running()
    }
}

struct ClaudeStream {
    control: Arc<RunControl>,
    session_reported: bool,
    // Kept open: closing stdin ends the stream-json session early.
    _stdin: ChildStdin,
}

#[async_trait]
impl LineHandler for ClaudeStream {
    async fn handle_line(&mut self, line: StreamLine) -> bool {
        if line.stream != LogType::Stdout {
            self.control.output(line.stream, line.text);
            return false;
        }
        if line.text.trim().is_empty() {
            return false;
        }

        let Ok(value) = serde_json::from_str::<Value>(&line.text) else {
            self.control.output(LogType::Stdout, line.text);
            return false;
        };

        if !self.session_reported {
            if let Some(session_id) = value.get("session_id").and_then(Value::as_str) {
                self.control.session(session_id);
                self.session_reported = true;
            }
        }
        self.control.output(LogType::Stdout, line.text);

        if value.get("type").and_then(Value::as_str) == Some("result") {
            let outcome = value
                .get("subtype")
                .and_then(Value::as_str)
                .unwrap_or("success");
            self.control
                .complete(format!("claude finished the turn ({outcome})"));
            return true;
        }
        false
    }
}
