//! Fake agent binaries: small `sh` scripts that speak each protocol.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use orch_core::types::LogType;
use tempfile::TempDir;

use crate::types::{ExecutorEvent, ExecutorRun};

pub(crate) struct FakeAgent {
    pub dir: TempDir,
    pub binary: PathBuf,
}

impl FakeAgent {
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.file(name)).unwrap_or_default()
    }
}

/// Write `body` as an executable script. `$DIR` inside the body expands to
/// the script's own temp dir.
pub(crate) fn fake_agent(body: &str) -> FakeAgent {
    let dir = tempfile::tempdir().expect("temp dir");
    let binary = dir.path().join("agent.sh");
    let script = format!(
        "#!/bin/sh\nDIR='{}'\n{}\n",
        dir.path().display(),
        body.trim_start()
    );
    fs::write(&binary, script).expect("write fake agent");
    fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).expect("chmod fake agent");
    FakeAgent { dir, binary }
}

/// Collect events until `Exited`, channel close, or `limit`.
pub(crate) async fn collect_events(run: &mut ExecutorRun, limit: Duration) -> Vec<ExecutorEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + limit;
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, run.next_event()).await {
        let done = matches!(event, ExecutorEvent::Exited(_));
        events.push(event);
        if done {
            break;
        }
    }
    events
}

pub(crate) fn outputs(events: &[ExecutorEvent], log_type: LogType) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ExecutorEvent::Output(output) if output.log_type == log_type => {
                Some(output.content.clone())
            }
            _ => None,
        })
        .collect()
}

pub(crate) fn sessions(events: &[ExecutorEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ExecutorEvent::SessionId(id) => Some(id.clone()),
            _ => None,
        })
        .collect()
}

pub(crate) fn exit_code(events: &[ExecutorEvent]) -> Option<i32> {
    match events.last() {
        Some(ExecutorEvent::Exited(code)) => Some(*code),
        _ => None,
    }
}
