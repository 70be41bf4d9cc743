use std::path::{Path, PathBuf};

use orch_core::config::{AgentSettings, OrchConfig};
use orch_core::types::ExecutorKind;

/// Read-only view of the settings the orchestrators consult per operation.
pub trait SettingsStore: Send + Sync {
    fn agent_settings(&self, kind: ExecutorKind) -> AgentSettings;

    /// Directory under which a repository's task worktrees are created.
    fn worktree_root(&self, repo_path: &Path) -> PathBuf;

    fn agent_enabled(&self, kind: ExecutorKind) -> bool {
        self.agent_settings(kind).enabled
    }
}

impl SettingsStore for OrchConfig {
    fn agent_settings(&self, kind: ExecutorKind) -> AgentSettings {
        self.agents.get(kind).clone()
    }

    fn worktree_root(&self, repo_path: &Path) -> PathBuf {
        self.worktrees.resolve_root(repo_path)
    }
}
