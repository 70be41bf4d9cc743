//! Request/response correlation over a line-delimited JSON channel.
//!
//! Codex speaks bare `{id, method, params}` envelopes; Gemini adds
//! `"jsonrpc": "2.0"`. Everything else is shared.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::io::AsyncWrite;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::debug;

use crate::error::RpcError;
use crate::process::write_line;

pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Codex,
    JsonRpc2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
}

/// One decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response {
        id: u64,
        outcome: Result<Value, RemoteError>,
    },
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Invalid(Value),
}

pub fn classify(value: Value) -> Incoming {
    let method = value
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_string);
    let id = value.get("id").filter(|id| !id.is_null()).cloned();
    let params = value.get("params").cloned().unwrap_or(Value::Null);

    match (id, method) {
        (Some(id), Some(method)) => Incoming::Request { id, method, params },
        (None, Some(method)) => Incoming::Notification { method, params },
        (Some(id), None) => {
            let Some(id) = parse_message_id(&id) else {
                return Incoming::Invalid(value);
            };
            let outcome = match value.get("error").filter(|error| !error.is_null()) {
                Some(error) => Err(RemoteError {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string()),
                }),
                None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            };
            Incoming::Response { id, outcome }
        }
        (None, None) => Incoming::Invalid(value),
    }
}

fn parse_message_id(value: &Value) -> Option<u64> {
    if let Some(id) = value.as_u64() {
        return Some(id);
    }
    if let Some(id) = value.as_i64() {
        return u64::try_from(id).ok();
    }
    value.as_str()?.parse::<u64>().ok()
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type Pending = HashMap<u64, (String, oneshot::Sender<Result<Value, RpcError>>)>;

pub struct RpcClient {
    dialect: Dialect,
    writer: AsyncMutex<Writer>,
    next_id: AtomicU64,
    pending: Mutex<Pending>,
    closed: AtomicBool,
    timeout: Duration,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("dialect", &self.dialect)
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl RpcClient {
    pub fn new(dialect: Dialect, writer: Writer, timeout: Duration) -> Self {
        Self {
            dialect,
            writer: AsyncMutex::new(writer),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            timeout,
        }
    }

    /// Send a request and wait for its response, bounded by the client timeout.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.request_with_timeout(method, params, Some(self.timeout))
            .await
    }

    /// Send a request; `None` waits until the response arrives or the
    /// process exits.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.lock_pending();
            if self.closed.load(Ordering::Acquire) {
                return Err(RpcError::ProcessExited {
                    method: method.to_string(),
                });
            }
            pending.insert(id, (method.to_string(), tx));
        }

        let mut envelope = self.envelope();
        envelope.insert("id".to_string(), json!(id));
        envelope.insert("method".to_string(), json!(method));
        envelope.insert("params".to_string(), params);
        if let Err(err) = self.write(method, Value::Object(envelope)).await {
            self.lock_pending().remove(&id);
            return Err(err);
        }
        debug!(id, method, "rpc request sent");

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.lock_pending().remove(&id);
                    return Err(RpcError::Timeout {
                        method: method.to_string(),
                        timeout_ms: limit.as_millis(),
                    });
                }
            },
            None => rx.await,
        };

        received.unwrap_or_else(|_| {
            Err(RpcError::ProcessExited {
                method: method.to_string(),
            })
        })
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        let mut envelope = self.envelope();
        envelope.insert("method".to_string(), json!(method));
        envelope.insert("params".to_string(), params);
        self.write(method, Value::Object(envelope)).await
    }

    pub async fn respond(&self, id: Value, result: Value) -> Result<(), RpcError> {
        let mut envelope = self.envelope();
        envelope.insert("id".to_string(), id);
        envelope.insert("result".to_string(), result);
        self.write("response", Value::Object(envelope)).await
    }

    pub async fn respond_error(&self, id: Value, code: i64, message: &str) -> Result<(), RpcError> {
        let mut envelope = self.envelope();
        envelope.insert("id".to_string(), id);
        envelope.insert("error".to_string(), json!({ "code": code, "message": message }));
        self.write("error response", Value::Object(envelope)).await
    }

    /// Hand a response to the request waiting on `id`. Returns false when no
    /// request with that id is pending.
    pub fn resolve(&self, id: u64, outcome: Result<Value, RemoteError>) -> bool {
        let Some((method, tx)) = self.lock_pending().remove(&id) else {
            debug!(id, "response without pending request ignored");
            return false;
        };
        let outcome = outcome.map_err(|error| RpcError::Remote {
            method,
            code: error.code,
            message: error.message,
        });
        let _ = tx.send(outcome);
        true
    }

    /// Fail every outstanding request; called once the process is gone.
    pub fn fail_all(&self) {
        let drained: Vec<_> = {
            let mut pending = self.lock_pending();
            self.closed.store(true, Ordering::Release);
            pending.drain().collect()
        };
        for (_, (method, tx)) in drained {
            let _ = tx.send(Err(RpcError::ProcessExited { method }));
        }
    }

    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    fn envelope(&self) -> Map<String, Value> {
        let mut envelope = Map::new();
        if self.dialect == Dialect::JsonRpc2 {
            envelope.insert("jsonrpc".to_string(), json!("2.0"));
        }
        envelope
    }

    async fn write(&self, method: &str, message: Value) -> Result<(), RpcError> {
        let line = serde_json::to_string(&message).map_err(|source| RpcError::Encode {
            method: method.to_string(),
            source,
        })?;
        let mut writer = self.writer.lock().await;
        write_line(&mut *writer, &line)
            .await
            .map_err(|source| RpcError::Write {
                method: method.to_string(),
                source,
            })
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::{classify, Dialect, Incoming, RemoteError, RpcClient};
    use crate::error::RpcError;

    fn sink_client(dialect: Dialect) -> RpcClient {
        RpcClient::new(dialect, Box::new(tokio::io::sink()), Duration::from_secs(5))
    }

    async fn wait_for_pending(client: &RpcClient, expected: usize) {
        for _ in 0..200 {
            if client.pending_len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pending count never reached {expected}");
    }

    #[test]
    fn classify_distinguishes_message_shapes() {
        assert!(matches!(
            classify(json!({"id": 3, "result": {"ok": true}})),
            Incoming::Response { id: 3, outcome: Ok(_) }
        ));
        assert!(matches!(
            classify(json!({"id": 4, "method": "execCommandApproval", "params": {}})),
            Incoming::Request { .. }
        ));
        assert!(matches!(
            classify(json!({"method": "codex/event/task_complete"})),
            Incoming::Notification { .. }
        ));
        assert!(matches!(classify(json!({"foo": 1})), Incoming::Invalid(_)));
        assert!(matches!(
            classify(json!({"id": "7", "error": {"code": -1, "message": "boom"}})),
            Incoming::Response { id: 7, outcome: Err(RemoteError { code: -1, .. }) }
        ));
    }

    #[tokio::test]
    async fn response_resolves_matching_request_once() {
        let client = Arc::new(sink_client(Dialect::Codex));
        let waiter = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request("newConversation", json!({})).await })
        };
        wait_for_pending(&client, 1).await;

        assert!(!client.resolve(99, Ok(json!({}))));
        assert_eq!(client.pending_len(), 1);

        assert!(client.resolve(1, Ok(json!({"conversationId": "c-1"}))));
        assert_eq!(client.pending_len(), 0);
        let result = waiter.await.expect("join").expect("response");
        assert_eq!(result["conversationId"], "c-1");

        assert!(!client.resolve(1, Ok(json!({"conversationId": "c-2"}))));
    }

    #[tokio::test]
    async fn remote_error_and_process_exit_fail_requests() {
        let client = Arc::new(sink_client(Dialect::JsonRpc2));
        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request("session/new", json!({})).await })
        };
        wait_for_pending(&client, 1).await;
        client.resolve(
            1,
            Err(RemoteError {
                code: -32000,
                message: "nope".to_string(),
            }),
        );
        assert!(matches!(
            first.await.expect("join"),
            Err(RpcError::Remote { code: -32000, .. })
        ));

        let second = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request_with_timeout("session/prompt", json!({}), None).await })
        };
        wait_for_pending(&client, 1).await;
        client.fail_all();
        assert!(matches!(
            second.await.expect("join"),
            Err(RpcError::ProcessExited { .. })
        ));

        let late = client.request("session/cancel", json!({})).await;
        assert!(matches!(late, Err(RpcError::ProcessExited { .. })));
    }

    #[tokio::test]
    async fn unanswered_request_times_out_and_is_forgotten() {
        let client = RpcClient::new(
            Dialect::Codex,
            Box::new(tokio::io::sink()),
            Duration::from_millis(20),
        );
        let err = client
            .request("initialize", json!({}))
            .await
            .expect_err("times out");
        assert!(matches!(err, RpcError::Timeout { .. }));
        assert_eq!(client.pending_len(), 0);
    }

    #[tokio::test]
    async fn envelopes_follow_dialect() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let codex = RpcClient::new(Dialect::Codex, Box::new(client_side), Duration::from_secs(1));
        codex.notify("initialized", json!({})).await.expect("notify");
        codex
            .respond(json!(5), json!({"decision": "approved_for_session"}))
            .await
            .expect("respond");

        let mut lines = BufReader::new(server_side).lines();
        let first: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(first, json!({"method": "initialized", "params": {}}));
        let second: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(second["id"], 5);
        assert!(second.get("jsonrpc").is_none());

        let (client_side, server_side) = tokio::io::duplex(4096);
        let gemini = RpcClient::new(Dialect::JsonRpc2, Box::new(client_side), Duration::from_secs(1));
        gemini
            .respond_error(json!(9), super::METHOD_NOT_FOUND, "method not found")
            .await
            .expect("respond error");
        let mut lines = BufReader::new(server_side).lines();
        let reply: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(reply["jsonrpc"], "2.0");
        assert_eq!(reply["error"]["code"], -32601);
    }
}
