//! Per-run lifecycle shared by an adapter and its background tasks.
//!
//! A run goes `Idle -> Running -> Finished` exactly once. Events are only
//! delivered while `Running`; `Exited` and `stop` both move to `Finished`, so
//! `Exited` is always the last event and a stopped run never reports one.

use std::sync::{Mutex, MutexGuard};

use orch_core::types::{ExecutorKind, LogType};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ExecutorError;
use crate::types::{ExecutorEvent, ExecutorOutput};

#[derive(Debug)]
enum Phase {
    Idle,
    Running(mpsc::UnboundedSender<ExecutorEvent>),
    Finished,
}

#[derive(Debug)]
pub struct RunControl {
    kind: ExecutorKind,
    phase: Mutex<Phase>,
    kill: CancellationToken,
}

impl RunControl {
    pub fn new(kind: ExecutorKind) -> Self {
        Self {
            kind,
            phase: Mutex::new(Phase::Idle),
            kill: CancellationToken::new(),
        }
    }

    pub fn kind(&self) -> ExecutorKind {
        self.kind
    }

    /// Claim the run and open its event channel.
    pub fn begin(&self) -> Result<mpsc::UnboundedReceiver<ExecutorEvent>, ExecutorError> {
        let mut phase = self.lock();
        match *phase {
            Phase::Idle => {
                let (tx, rx) = mpsc::unbounded_channel();
                *phase = Phase::Running(tx);
                Ok(rx)
            }
            Phase::Running(_) => Err(ExecutorError::AlreadyRunning { kind: self.kind }),
            Phase::Finished => Err(ExecutorError::Spent { kind: self.kind }),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock(), Phase::Running(_))
    }

    /// Token that kills the child process when cancelled.
    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }

    pub fn output(&self, log_type: LogType, content: impl Into<String>) {
        self.send(ExecutorEvent::Output(ExecutorOutput::new(log_type, content)));
    }

    pub fn session(&self, session_id: impl Into<String>) {
        self.send(ExecutorEvent::SessionId(session_id.into()));
    }

    /// Report the exit code and finish the run. Returns false when the run
    /// was already finished or stopped.
    pub fn exit(&self, code: i32) -> bool {
        let mut phase = self.lock();
        match std::mem::replace(&mut *phase, Phase::Finished) {
            Phase::Running(tx) => {
                let _ = tx.send(ExecutorEvent::Exited(code));
                debug!(kind = %self.kind, code, "executor exited");
                true
            }
            other => {
                *phase = other;
                false
            }
        }
    }

    /// Agent signalled it is done: emit a closing system line, report exit
    /// code 0 and kill the process, which may otherwise idle on stdin.
    pub fn complete(&self, summary: impl Into<String>) {
        self.output(LogType::System, summary);
        self.exit(0);
        self.kill.cancel();
    }

    /// Finish without reporting an exit and kill the process.
    pub fn stop(&self) -> bool {
        let was_running = self.close();
        self.kill.cancel();
        was_running
    }

    /// Finish without reporting an exit, leaving the process alive so the
    /// caller can still say goodbye over stdin before killing it.
    pub fn close(&self) -> bool {
        let mut phase = self.lock();
        matches!(
            std::mem::replace(&mut *phase, Phase::Finished),
            Phase::Running(_)
        )
    }

    fn send(&self, event: ExecutorEvent) {
        if let Phase::Running(tx) = &*self.lock() {
            let _ = tx.send(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
