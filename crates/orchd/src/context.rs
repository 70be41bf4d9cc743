//! Collaborators shared by the task and epic orchestrators.

use std::sync::Arc;

use orch_agents::{Executor, ExecutorFactory, ExecutorOutput};
use orch_core::events::{Event, EventKind};
use orch_core::types::{EpicId, ExecutionLog, ExecutorKind, LogType, TaskId};
use orch_git::GitCli;
use orch_notify::EventSink;
use orch_scripts::ScriptRunner;
use tracing::warn;

use crate::error::OrchestratorError;
use crate::settings::SettingsStore;
use crate::store::TaskStore;

#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn TaskStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub factory: Arc<dyn ExecutorFactory>,
    pub events: Arc<dyn EventSink>,
    pub git: GitCli,
    pub scripts: ScriptRunner,
}

impl Collaborators {
    pub fn new(
        store: Arc<dyn TaskStore>,
        settings: Arc<dyn SettingsStore>,
        factory: Arc<dyn ExecutorFactory>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            settings,
            factory,
            events,
            git: GitCli::default(),
            scripts: ScriptRunner::default(),
        }
    }

    pub fn with_git(mut self, git: GitCli) -> Self {
        self.git = git;
        self
    }

    pub fn with_scripts(mut self, scripts: ScriptRunner) -> Self {
        self.scripts = scripts;
        self
    }

    /// Event delivery never fails an operation; sink errors are logged.
    pub(crate) fn publish(&self, event: Event) {
        if let Err(err) = self.events.publish(&event) {
            warn!(sink = self.events.name(), event = event.kind.tag(), error = %err, "event not delivered");
        }
    }

    pub(crate) fn task_event(&self, task_id: &TaskId, kind: EventKind) {
        self.publish(Event::for_task(task_id.clone(), kind));
    }

    pub(crate) fn epic_event(&self, epic_id: &EpicId, kind: EventKind) {
        self.publish(Event::for_epic(epic_id.clone(), kind));
    }

    /// Persist one execution log row and fan it out.
    pub(crate) fn record_log(&self, log: ExecutionLog) {
        if let Err(err) = self.store.append_log(&log) {
            warn!(error = %err, "failed to persist execution log");
        }
        self.publish(Event::log(log));
    }

    pub(crate) fn record_task_output(&self, task_id: &TaskId, output: ExecutorOutput) {
        self.record_log(ExecutionLog::for_task(
            task_id.clone(),
            output.log_type,
            output.content,
        ));
    }

    pub(crate) fn task_system_log(&self, task_id: &TaskId, content: impl Into<String>) {
        self.record_log(ExecutionLog::for_task(
            task_id.clone(),
            LogType::System,
            content,
        ));
    }

    pub(crate) fn ensure_enabled(&self, kind: ExecutorKind) -> Result<(), OrchestratorError> {
        if self.settings.agent_enabled(kind) {
            Ok(())
        } else {
            Err(OrchestratorError::AgentDisabled { kind })
        }
    }

    pub(crate) fn create_executor(
        &self,
        kind: ExecutorKind,
    ) -> Result<Arc<dyn Executor>, OrchestratorError> {
        Ok(self.factory.create(kind)?)
    }
}
