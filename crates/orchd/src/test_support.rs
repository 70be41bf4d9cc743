//! Scripted executors for orchestrator tests.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orch_agents::{
    Executor, ExecutorConfig, ExecutorError, ExecutorEvent, ExecutorFactory, ExecutorOutput,
    ExecutorRun,
};
use orch_core::types::{ExecutorKind, LogType};
use tokio::sync::mpsc;

type SenderSlot = Arc<Mutex<Option<mpsc::UnboundedSender<ExecutorEvent>>>>;

/// Test-side handle on one started run.
#[derive(Clone)]
pub struct ScriptedRun {
    pub config: ExecutorConfig,
    sender: SenderSlot,
    stopped: Arc<AtomicBool>,
}

impl ScriptedRun {
    pub fn output(&self, text: &str) {
        self.send(ExecutorEvent::Output(ExecutorOutput::new(LogType::Stdout, text)));
    }

    pub fn session(&self, id: &str) {
        self.send(ExecutorEvent::SessionId(id.to_string()));
    }

    /// Send the final `Exited` event and close the run.
    pub fn exit(&self, code: i32) {
        self.send(ExecutorEvent::Exited(code));
        self.sender.lock().unwrap().take();
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn send(&self, event: ExecutorEvent) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(event);
        }
    }
}

struct ScriptedExecutor {
    kind: ExecutorKind,
    fail_start: bool,
    runs: Arc<Mutex<Vec<ScriptedRun>>>,
    sender: SenderSlot,
    running: AtomicBool,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn kind(&self) -> ExecutorKind {
        self.kind
    }

    async fn start(&self, config: ExecutorConfig) -> Result<ExecutorRun, ExecutorError> {
        if self.fail_start {
            return Err(ExecutorError::Spawn {
                binary: PathBuf::from("scripted-agent"),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
            });
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ExecutorError::AlreadyRunning { kind: self.kind });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        self.runs.lock().unwrap().push(ScriptedRun {
            config,
            sender: Arc::clone(&self.sender),
            stopped: Arc::clone(&self.stopped),
        });
        Ok(ExecutorRun { events: rx })
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.sender.lock().unwrap().take();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Factory whose executors never spawn anything; tests drive each run
/// through its [`ScriptedRun`] handle.
#[derive(Default)]
pub struct ScriptedFactory {
    runs: Arc<Mutex<Vec<ScriptedRun>>>,
    failing_starts: AtomicUsize,
    created: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `count` executors fail to start.
    pub fn fail_next_starts(&self, count: usize) {
        self.failing_starts.store(count, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn run(&self, index: usize) -> ScriptedRun {
        self.runs.lock().unwrap()[index].clone()
    }

    pub fn last_run(&self) -> ScriptedRun {
        self.runs
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no run started")
    }

    pub async fn wait_for_runs(&self, count: usize) {
        wait_until("scripted runs", || self.run_count() >= count).await;
    }
}

impl ExecutorFactory for ScriptedFactory {
    fn create(&self, kind: ExecutorKind) -> Result<Arc<dyn Executor>, ExecutorError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let fail_start = self
            .failing_starts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        Ok(Arc::new(ScriptedExecutor {
            kind,
            fail_start,
            runs: Arc::clone(&self.runs),
            sender: Arc::new(Mutex::new(None)),
            running: AtomicBool::new(false),
            stopped: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
