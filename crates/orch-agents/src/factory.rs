use std::sync::Arc;

use orch_core::config::{AgentSettings, AgentsConfig};
use orch_core::types::ExecutorKind;

use crate::claude::ClaudeAdapter;
use crate::codex::CodexAdapter;
use crate::copilot::CopilotAdapter;
use crate::error::ExecutorError;
use crate::executor::Executor;
use crate::gemini::GeminiAdapter;
use crate::types::AdapterTuning;

/// Build a fresh adapter for `kind` using its configured binary.
pub fn create_executor(
    kind: ExecutorKind,
    settings: &AgentSettings,
    tuning: &AdapterTuning,
) -> Result<Arc<dyn Executor>, ExecutorError> {
    if !settings.enabled {
        return Err(ExecutorError::Disabled { kind });
    }

    let binary = settings.path.as_str();
    let tuning = tuning.clone();
    let executor: Arc<dyn Executor> = match kind {
        ExecutorKind::ClaudeCode => Arc::new(ClaudeAdapter::new(binary, tuning)),
        ExecutorKind::Codex => Arc::new(CodexAdapter::new(binary, tuning)),
        ExecutorKind::Copilot => Arc::new(CopilotAdapter::new(binary, tuning)),
        ExecutorKind::Gemini => Arc::new(GeminiAdapter::new(binary, tuning)),
    };
    Ok(executor)
}

/// Source of executors for the orchestrators. Every call returns a new,
/// never-started instance.
pub trait ExecutorFactory: Send + Sync {
    fn create(&self, kind: ExecutorKind) -> Result<Arc<dyn Executor>, ExecutorError>;
}

#[derive(Debug, Clone, Default)]
pub struct AgentExecutorFactory {
    agents: AgentsConfig,
    tuning: AdapterTuning,
}

impl AgentExecutorFactory {
    pub fn new(agents: AgentsConfig, tuning: AdapterTuning) -> Self {
        Self { agents, tuning }
    }
}

impl ExecutorFactory for AgentExecutorFactory {
    fn create(&self, kind: ExecutorKind) -> Result<Arc<dyn Executor>, ExecutorError> {
        create_executor(kind, self.agents.get(kind), &self.tuning)
    }
}
