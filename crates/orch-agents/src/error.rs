use std::path::PathBuf;

use orch_core::types::ExecutorKind;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("request {method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u128 },
    #[error("agent process exited before answering {method}")]
    ProcessExited { method: String },
    #[error("agent rejected {method} (code {code}): {message}")]
    Remote {
        method: String,
        code: i64,
        message: String,
    },
    #[error("failed to write {method} to agent stdin: {source}")]
    Write {
        method: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {method}: {source}")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected response to {method}: {message}")]
    Protocol { method: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("{kind} executor is already running")]
    AlreadyRunning { kind: ExecutorKind },
    #[error("{kind} executor has already run; create a new instance to restart")]
    Spent { kind: ExecutorKind },
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("agent {stream} pipe was not captured")]
    MissingPipe { stream: &'static str },
    #[error("failed to write prompt to agent stdin: {source}")]
    Stdin {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{kind} handshake failed: {source}")]
    Handshake {
        kind: ExecutorKind,
        #[source]
        source: RpcError,
    },
    #[error("{kind} agent is disabled in settings")]
    Disabled { kind: ExecutorKind },
    #[error("no conversation established")]
    NoConversation,
    #[error("{kind} executor does not accept follow-up messages")]
    Unsupported { kind: ExecutorKind },
    #[error("follow-up message failed: {source}")]
    Message {
        #[source]
        source: RpcError,
    },
}
