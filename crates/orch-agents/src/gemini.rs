//! Gemini CLI over the Agent Client Protocol (JSON-RPC 2.0 on stdio).
//!
//! The `session/prompt` request stays open for the whole agent turn; its
//! response is the completion signal.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

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

const PROTOCOL_VERSION: u64 = 1;
const CANCEL_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct GeminiAdapter {
    binary: PathBuf,
    tuning: AdapterTuning,
    control: Arc<RunControl>,
    rpc: Mutex<Option<Arc<RpcClient>>>,
    session_id: Mutex<Option<String>>,
}

impl GeminiAdapter {
    pub fn new(binary: impl Into<PathBuf>, tuning: AdapterTuning) -> Self {
        Self {
            binary: binary.into(),
            tuning,
            control: Arc::new(RunControl::new(ExecutorKind::Gemini)),
            rpc: Mutex::new(None),
            session_id: Mutex::new(None),
        }
    }

    async fn open_session(&self, rpc: &RpcClient, config: &ExecutorConfig) -> Result<String, RpcError> {
        let init = rpc
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "clientCapabilities": {
                        "fs": { "readTextFile": false, "writeTextFile": false },
                    },
                }),
            )
            .await?;
        let can_load = init
            .pointer("/agentCapabilities/loadSession")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let cwd = config.working_directory.display().to_string();
        match config.session_id.as_deref() {
            Some(session_id) if can_load => {
                rpc.request(
                    "session/load",
                    json!({ "sessionId": session_id, "cwd": cwd, "mcpServers": [] }),
                )
                .await?;
                Ok(session_id.to_string())
            }
            _ => {
                let created = rpc
                    .request("session/new", json!({ "cwd": cwd, "mcpServers": [] }))
                    .await?;
                created
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| RpcError::Protocol {
                        method: "session/new".to_string(),
                        message: "response carried no sessionId".to_string(),
                    })
            }
        }
    }
}

#[async_trait]
impl Executor for GeminiAdapter {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Gemini
    }

    async fn start(&self, config: ExecutorConfig) -> Result<ExecutorRun, ExecutorError> {
        let events = self.control.begin()?;
        let spec = SpawnSpec::new(&self.binary, &config.working_directory).arg("--experimental-acp");
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
            Dialect::JsonRpc2,
            Box::new(stdin),
            self.tuning.request_timeout,
        ));
        *lock(&self.rpc) = Some(Arc::clone(&rpc));

        let control = Arc::clone(&self.control);
        let grace = self.tuning.drain_grace;
        let mut handler = GeminiStream {
            control: Arc::clone(&control),
            rpc: Arc::clone(&rpc),
        };
        tokio::spawn(async move {
            pump_lines(lines, exit, &control, grace, &mut handler).await;
        });

        let session_id = match self.open_session(&rpc, &config).await {
            Ok(session_id) => session_id,
            Err(source) => {
                self.control.stop();
                return Err(ExecutorError::Handshake {
                    kind: ExecutorKind::Gemini,
                    source,
                });
            }
        };
        *lock(&self.session_id) = Some(session_id.clone());
        self.control.session(session_id.clone());
        info!(task_id = %config.task_id, pid = ?pid, %session_id, "gemini session opened");

        let control = Arc::clone(&self.control);
        let params = json!({
            "sessionId": session_id,
            "prompt": [{ "type": "text", "text": config.prompt }],
        });
        tokio::spawn(async move {
            match rpc.request_with_timeout("session/prompt", params, None).await {
                Ok(result) => {
                    let reason = result
                        .get("stopReason")
                        .and_then(Value::as_str)
                        .unwrap_or("end_turn");
                    control.complete(format!("gemini finished the turn ({reason})"));
                }
                // The exit path reports the real exit code.
                Err(RpcError::ProcessExited { .. }) => {}
                Err(err) => {
                    warn!(error = %err, "gemini prompt failed");
                    control.output(LogType::Stderr, err.to_string());
                    control.exit(1);
                    control.kill_token().cancel();
                }
            }
        });

        Ok(ExecutorRun { events })
    }

    async fn stop(&self) {
        if !self.control.close() {
            self.control.kill_token().cancel();
            return;
        }

        let rpc = lock(&self.rpc).clone();
        let session_id = lock(&self.session_id).clone();
        if let (Some(rpc), Some(session_id)) = (rpc, session_id) {
            let cancel = rpc.notify("session/cancel", json!({ "sessionId": session_id }));
            match tokio::time::timeout(CANCEL_TIMEOUT, cancel).await {
                Ok(Ok(())) => debug!("gemini session cancelled"),
                Ok(Err(err)) => debug!(error = %err, "gemini cancel not delivered"),
                Err(_) => debug!("gemini cancel timed out"),
            }
        }
        self.control.kill_token().cancel();
    }

    fn is_running(&self) -> bool {
        self.control.is_running()
    }
}

struct GeminiStream {
    control: Arc<RunControl>,
    rpc: Arc<RpcClient>,
}

impl GeminiStream {
    async fn answer(&self, id: Value, method: &str, params: &Value) {
        let reply = if method == "session/request_permission" {
            let response = permission_response(params);
            self.control.output(
                LogType::System,
                format!("[permission] {}", single_line(&response.to_string())),
            );
            self.rpc.respond(id, response).await
        } else {
            self.rpc
                .respond_error(id, METHOD_NOT_FOUND, &format!("method not found: {method}"))
                .await
        };
        if let Err(err) = reply {
            warn!(error = %err, method, "failed to answer gemini request");
        }
    }
}

#[async_trait]
impl LineHandler for GeminiStream {
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
            }
            Incoming::Request { id, method, params } => {
                self.answer(id, &method, &params).await;
            }
            Incoming::Notification { method, params } if method == "session/update" => {
                let text = format_update(&params);
                if !text.is_empty() {
                    self.control.output(LogType::Stdout, text);
                }
            }
            Incoming::Notification { .. } | Incoming::Invalid(_) => {
                self.control.output(LogType::Stdout, line.text);
            }
        }
        false
    }

    async fn on_exit(&mut self) {
        self.rpc.fail_all();
    }
}

fn option_kind(option: &Value) -> &str {
    option.get("kind").and_then(Value::as_str).unwrap_or("")
}

/// Pick the option to answer a permission prompt with: `allow_always`, then
/// `allow_once`, then anything that is not a rejection. `None` means cancel.
pub fn select_permission_option(options: &[Value]) -> Option<&Value> {
    options
        .iter()
        .find(|option| option_kind(option) == "allow_always")
        .or_else(|| options.iter().find(|option| option_kind(option) == "allow_once"))
        .or_else(|| {
            options
                .iter()
                .find(|option| !option_kind(option).starts_with("reject"))
        })
}

pub fn permission_response(params: &Value) -> Value {
    let options = params
        .get("options")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let option_id = select_permission_option(options)
        .and_then(|option| option.get("optionId"))
        .and_then(Value::as_str);

    match option_id {
        Some(option_id) => json!({ "outcome": { "outcome": "selected", "optionId": option_id } }),
        None => json!({ "outcome": { "outcome": "cancelled" } }),
    }
}

/// Render a `session/update` payload as one readable line. Unknown update
/// types come through as their raw JSON.
pub fn format_update(params: &Value) -> String {
    let update = params.get("update").unwrap_or(params);
    let text = match update.get("sessionUpdate").and_then(Value::as_str) {
        Some("agent_message_chunk") => content_text(update.get("content")),
        Some("agent_thought_chunk") => format!("[thought] {}", content_text(update.get("content"))),
        Some("user_message_chunk") => format!("[user] {}", content_text(update.get("content"))),
        Some("tool_call") => {
            let mut parts = vec!["[tool]".to_string()];
            if let Some(title) = str_field(update, "title") {
                parts.push(title.to_string());
            }
            if let Some(kind) = str_field(update, "kind") {
                parts.push(format!("({kind})"));
            }
            if let Some(status) = str_field(update, "status") {
                parts.push(status.to_string());
            }
            parts.join(" ")
        }
        Some("tool_call_update") => {
            let id = str_field(update, "toolCallId").unwrap_or("?");
            let mut parts = vec![format!("[tool:{id}]")];
            if let Some(title) = str_field(update, "title") {
                parts.push(title.to_string());
            }
            parts.push(str_field(update, "status").unwrap_or("updated").to_string());
            parts.join(" ")
        }
        Some("plan") => {
            let entries = update
                .get("entries")
                .and_then(Value::as_array)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|entry| {
                            let status = str_field(entry, "status").unwrap_or("pending");
                            let content = str_field(entry, "content").unwrap_or("");
                            format!("[{status}] {content}")
                        })
                        .collect::<Vec<_>>()
                        .join("; ")
                })
                .unwrap_or_default();
            format!("[plan] {entries}")
        }
        _ => update.to_string(),
    };
    single_line(&text)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| content_text(Some(item)))
            .collect::<Vec<_>>()
            .join(" "),
        Some(item) => match item.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => item.to_string(),
        },
        None => String::new(),
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
