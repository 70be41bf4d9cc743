//! Orchestrator configuration (`orch.toml`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::ExecutorKind;

pub const DEFAULT_WORKTREE_ROOT: &str = ".orch/wt";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchConfig {
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub worktrees: WorktreeConfig,
    #[serde(default)]
    pub executor: ExecutorTuning,
}

/// Per-agent administrative settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub path: String,
}

impl AgentSettings {
    pub fn enabled(path: impl Into<String>) -> Self {
        Self {
            enabled: true,
            path: path.into(),
        }
    }

    pub fn default_for(kind: ExecutorKind) -> Self {
        Self::enabled(kind.default_binary())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_claude")]
    pub claude: AgentSettings,
    #[serde(default = "default_codex")]
    pub codex: AgentSettings,
    #[serde(default = "default_copilot")]
    pub copilot: AgentSettings,
    #[serde(default = "default_gemini")]
    pub gemini: AgentSettings,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            claude: default_claude(),
            codex: default_codex(),
            copilot: default_copilot(),
            gemini: default_gemini(),
        }
    }
}

impl AgentsConfig {
    pub fn get(&self, kind: ExecutorKind) -> &AgentSettings {
        match kind {
            ExecutorKind::ClaudeCode => &self.claude,
            ExecutorKind::Codex => &self.codex,
            ExecutorKind::Copilot => &self.copilot,
            ExecutorKind::Gemini => &self.gemini,
        }
    }

    pub fn get_mut(&mut self, kind: ExecutorKind) -> &mut AgentSettings {
        match kind {
            ExecutorKind::ClaudeCode => &mut self.claude,
            ExecutorKind::Codex => &mut self.codex,
            ExecutorKind::Copilot => &mut self.copilot,
            ExecutorKind::Gemini => &mut self.gemini,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeConfig {
    /// Relative roots resolve against the repository path.
    #[serde(default = "default_worktree_root")]
    pub root: PathBuf,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            root: default_worktree_root(),
        }
    }
}

impl WorktreeConfig {
    pub fn resolve_root(&self, repo_path: &Path) -> PathBuf {
        if self.root.is_absolute() {
            self.root.clone()
        } else {
            repo_path.join(&self.root)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorTuning {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_session_watch_timeout_secs")]
    pub session_watch_timeout_secs: u64,
    #[serde(default = "default_session_poll_interval_ms")]
    pub session_poll_interval_ms: u64,
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

impl Default for ExecutorTuning {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            session_watch_timeout_secs: default_session_watch_timeout_secs(),
            session_poll_interval_ms: default_session_poll_interval_ms(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

impl ExecutorTuning {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_watch_timeout(&self) -> Duration {
        Duration::from_secs(self.session_watch_timeout_secs)
    }

    pub fn session_poll_interval(&self) -> Duration {
        Duration::from_millis(self.session_poll_interval_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_claude() -> AgentSettings {
    AgentSettings::default_for(ExecutorKind::ClaudeCode)
}

fn default_codex() -> AgentSettings {
    AgentSettings::default_for(ExecutorKind::Codex)
}

fn default_copilot() -> AgentSettings {
    AgentSettings::default_for(ExecutorKind::Copilot)
}

fn default_gemini() -> AgentSettings {
    AgentSettings::default_for(ExecutorKind::Gemini)
}

fn default_worktree_root() -> PathBuf {
    PathBuf::from(DEFAULT_WORKTREE_ROOT)
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_session_watch_timeout_secs() -> u64 {
    600
}

fn default_session_poll_interval_ms() -> u64 {
    200
}

fn default_drain_grace_ms() -> u64 {
    2000
}

pub fn parse_config(contents: &str) -> Result<OrchConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<OrchConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

/// Loads `path` if it exists, falling back to defaults otherwise.
pub fn load_config_or_default(path: impl AsRef<Path>) -> Result<OrchConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Ok(OrchConfig::default());
    }
    load_config(path_ref)
}

pub fn save_config(path: impl AsRef<Path>, config: &OrchConfig) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    if let Some(parent_dir) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent_dir).map_err(|source| ConfigError::CreateDir {
            path: parent_dir.to_path_buf(),
            source,
        })?;
    }

    let body = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;
    fs::write(path_ref, body).map_err(|source| ConfigError::Write {
        path: path_ref.to_path_buf(),
        source,
    })?;
    Ok(())
}
