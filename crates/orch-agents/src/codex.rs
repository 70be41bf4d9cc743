//! Codex `app-server`: request/response envelopes without a protocol tag,
//! conversations, and `codex/event/*` notifications.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use orch_core::types::{ExecutorKind, LogType};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::control::RunControl;
use crate::error::{ExecutorError, RpcError};
use crate::executor::Executor;
use crate::process::{pump_lines, spawn_agent, AgentProcess, LineHandler, SpawnSpec, StreamLine};
use crate::rpc::{classify, Dialect, Incoming, RpcClient, METHOD_NOT_FOUND};
use crate::types::{AdapterTuning, ExecutorConfig, ExecutorRun};

pub const TASK_COMPLETE: &str = "codex/event/task_complete";
const APPROVAL_METHODS: [&str; 2] = ["applyPatchApproval", "execCommandApproval"];

#[derive(Debug)]
pub struct CodexAdapter {
    binary: PathBuf,
    tuning: AdapterTuning,
    control: Arc<RunControl>,
    rpc: Mutex<Option<Arc<RpcClient>>>,
    conversation_id: Mutex<Option<String>>,
}

impl CodexAdapter {
    pub fn new(binary: impl Into<PathBuf>, tuning: AdapterTuning) -> Self {
        Self {
            binary: binary.into(),
            tuning,
            control: Arc::new(RunControl::new(ExecutorKind::Codex)),
            rpc: Mutex::new(None),
            conversation_id: Mutex::new(None),
        }
    }

    pub fn conversation_id(&self) -> Option<String> {
        lock(&self.conversation_id).clone()
    }

    async fn handshake(&self, rpc: &RpcClient, config: &ExecutorConfig) -> Result<String, RpcError> {
        rpc.request(
            "initialize",
            json!({
                "clientInfo": {
                    "name": "orch",
                    "title": "orch",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )
        .await?;
        rpc.notify("initialized", json!({})).await?;

        let (method, params) = conversation_request(&config.working_directory, config.session_id.as_deref());
        let conversation = rpc.request(method, params).await?;
        let conversation_id = conversation
            .get("conversationId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RpcError::Protocol {
                method: method.to_string(),
                message: "response carried no conversationId".to_string(),
            })?;
        *lock(&self.conversation_id) = Some(conversation_id.clone());
        self.control.session(conversation_id.clone());

        rpc.request(
            "addConversationListener",
            json!({ "conversationId": conversation_id }),
        )
        .await?;
        rpc.request("sendUserMessage", user_message(&conversation_id, &config.prompt))
            .await?;
        Ok(conversation_id)
    }
}

/// `newConversation`, or `resumeConversation` when a session token is known.
/// The token is opaque: an existing rollout file is passed as `path`,
/// anything else as a `conversationId`.
fn conversation_request(cwd: &Path, session_id: Option<&str>) -> (&'static str, Value) {
    let cwd = cwd.display().to_string();
    match session_id {
        None => ("newConversation", json!({ "cwd": cwd })),
        Some(token) if Path::new(token).is_file() => (
            "resumeConversation",
            json!({ "path": token, "overrides": { "cwd": cwd } }),
        ),
        Some(token) => (
            "resumeConversation",
            json!({ "conversationId": token, "overrides": { "cwd": cwd } }),
        ),
    }
}

fn user_message(conversation_id: &str, text: &str) -> Value {
    json!({
        "conversationId": conversation_id,
        "items": [{ "type": "text", "data": { "text": text } }],
    })
}

#[async_trait]
impl Executor for CodexAdapter {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Codex
    }

    async fn start(&self, config: ExecutorConfig) -> Result<ExecutorRun, ExecutorError> {
        let events = self.control.begin()?;
        let spec = SpawnSpec::new(&self.binary, &config.working_directory).arg("app-server");
        let AgentProcess {
            stdin,
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

        let rpc = Arc::new(RpcClient::new(
            Dialect::Codex,
            Box::new(stdin),
            self.tuning.request_timeout,
        ));
        *lock(&self.rpc) = Some(Arc::clone(&rpc));

        let control = Arc::clone(&self.control);
        let grace = self.tuning.drain_grace;
        let mut handler = CodexStream {
            control: Arc::clone(&control),
            rpc: Arc::clone(&rpc),
        };
        tokio::spawn(async move {
            pump_lines(lines, exit, &control, grace, &mut handler).await;
        });

        match self.handshake(&rpc, &config).await {
            Ok(conversation_id) => {
                info!(task_id = %config.task_id, pid = ?pid, %conversation_id, "codex conversation started");
                Ok(ExecutorRun { events })
            }
            Err(source) => {
                self.control.stop();
                Err(ExecutorError::Handshake {
                    kind: ExecutorKind::Codex,
                    source,
                })
            }
        }
    }

    async fn stop(&self) {
        if self.control.stop() {
            debug!("codex stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.control.is_running()
    }

    async fn send_message(&self, content: &str) -> Result<(), ExecutorError> {
        let conversation_id = self.conversation_id().ok_or(ExecutorError::NoConversation)?;
        let rpc = lock(&self.rpc).clone().ok_or(ExecutorError::NoConversation)?;
        rpc.request("sendUserMessage", user_message(&conversation_id, content))
            .await
            .map(|_| ())
            .map_err(|source| ExecutorError::Message { source })
    }
}

struct CodexStream {
    control: Arc<RunControl>,
    rpc: Arc<RpcClient>,
}

impl CodexStream {
    async fn answer(&self, id: Value, method: &str) {
        let reply = if APPROVAL_METHODS.contains(&method) {
            debug!(method, "auto-approving agent request");
            self.rpc
                .respond(id, json!({ "decision": "approved_for_session" }))
                .await
        } else {
            self.rpc
                .respond_error(id, METHOD_NOT_FOUND, &format!("method not found: {method}"))
                .await
        };
        if let Err(err) = reply {
            warn!(error = %err, method, "failed to answer codex request");
        }
    }
}

#[async_trait]
impl LineHandler for CodexStream {
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

        match classify(value) {
            Incoming::Response { id, outcome } => {
                self.rpc.resolve(id, outcome);
                false
            }
            Incoming::Request { id, method, .. } => {
                self.control.output(LogType::Stdout, line.text);
                self.answer(id, &method).await;
                false
            }
            Incoming::Notification { method, .. } => {
                self.control.output(LogType::Stdout, line.text);
                if method == TASK_COMPLETE {
                    self.control.complete("codex task complete");
                    return true;
                }
                false
            }
            Incoming::Invalid(_) => {
                self.control.output(LogType::Stdout, line.text);
                false
            }
        }
    }

    async fn on_exit(&mut self) {
        self.rpc.fail_all();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
