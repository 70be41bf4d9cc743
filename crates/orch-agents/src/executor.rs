use async_trait::async_trait;
use orch_core::types::ExecutorKind;

use crate::error::ExecutorError;
use crate::types::{ExecutorConfig, ExecutorRun};

/// One agent subprocess driven through its wire protocol.
///
/// An executor runs at most once: `start` on a running instance fails with
/// [`ExecutorError::AlreadyRunning`], and after exit or `stop` callers build a
/// fresh instance.
#[async_trait]
pub trait Executor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// Spawn the agent and hand it `config.prompt`. Resolves once the agent
    /// has accepted the prompt; output then arrives on the returned run.
    async fn start(&self, config: ExecutorConfig) -> Result<ExecutorRun, ExecutorError>;

    /// Kill the agent. Idempotent, never waits for output to drain, and the
    /// run reports no `Exited` event afterwards.
    async fn stop(&self);

    fn is_running(&self) -> bool;

    /// Post a follow-up instruction into the live session.
    async fn send_message(&self, _content: &str) -> Result<(), ExecutorError> {
        Err(ExecutorError::Unsupported { kind: self.kind() })
    }
}
