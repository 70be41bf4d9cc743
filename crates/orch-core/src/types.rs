//! Core record types shared by the orchestrator crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::state::TaskStatus;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(TaskId);
string_id!(RepoId);
string_id!(EpicId);
string_id!(MessageId);
string_id!(LogId);
string_id!(EventId);

/// The external agent binary a task is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    ClaudeCode,
    Codex,
    Copilot,
    Gemini,
}

impl ExecutorKind {
    pub const ALL: [ExecutorKind; 4] = [
        ExecutorKind::ClaudeCode,
        ExecutorKind::Codex,
        ExecutorKind::Copilot,
        ExecutorKind::Gemini,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorKind::ClaudeCode => "claude_code",
            ExecutorKind::Codex => "codex",
            ExecutorKind::Copilot => "copilot",
            ExecutorKind::Gemini => "gemini",
        }
    }

    /// Binary name looked up on `PATH` when no explicit path is configured.
    pub fn default_binary(self) -> &'static str {
        match self {
            ExecutorKind::ClaudeCode => "claude",
            ExecutorKind::Codex => "codex",
            ExecutorKind::Copilot => "copilot",
            ExecutorKind::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutorKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "claude" | "claude_code" | "claude-code" => Ok(ExecutorKind::ClaudeCode),
            "codex" => Ok(ExecutorKind::Codex),
            "copilot" => Ok(ExecutorKind::Copilot),
            "gemini" => Ok(ExecutorKind::Gemini),
            other => Err(format!(
                "invalid executor kind '{other}'. valid values: claude, codex, copilot, gemini"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub repository_id: RepoId,
    #[serde(default)]
    pub epic_id: Option<EpicId>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub executor_kind: ExecutorKind,
    pub branch_name: String,
    pub base_branch: String,
    /// Present only while the task is InProgress or InReview.
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,
    /// Opaque resume token owned by the adapter; never cleared, only replaced.
    #[serde(default)]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        id: TaskId,
        repository_id: RepoId,
        title: impl Into<String>,
        executor_kind: ExecutorKind,
        branch_name: impl Into<String>,
        base_branch: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            repository_id,
            epic_id: None,
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            executor_kind,
            branch_name: branch_name.into(),
            base_branch: base_branch.into(),
            worktree_path: None,
            session_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Instruction handed to a fresh executor: `description ?? title`.
    pub fn initial_prompt(&self) -> String {
        match &self.description {
            Some(description) if !description.trim().is_empty() => description.clone(),
            _ => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    pub name: String,
    pub path: PathBuf,
    pub default_branch: String,
    #[serde(default)]
    pub setup_script: Option<String>,
    #[serde(default)]
    pub start_script: Option<String>,
    #[serde(default)]
    pub stop_script: Option<String>,
    #[serde(default)]
    pub cleanup_script: Option<String>,
    /// Newline-separated glob list copied into fresh worktrees.
    #[serde(default)]
    pub copy_files: Option<String>,
}

impl Repository {
    pub fn new(id: RepoId, path: impl Into<PathBuf>, default_branch: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.0.clone());
        Self {
            id,
            name,
            path,
            default_branch: default_branch.into(),
            setup_script: None,
            start_script: None,
            stop_script: None,
            cleanup_script: None,
            copy_files: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Failed,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub task_id: TaskId,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl QueuedMessage {
    pub fn pending(task_id: TaskId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            task_id,
            content: content.into(),
            status: MessageStatus::Pending,
            created_at: Utc::now(),
            delivered_at: None,
        }
    }

    pub fn mark_delivered(&mut self, at: DateTime<Utc>) {
        self.status = MessageStatus::Delivered;
        self.delivered_at = Some(at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Stdout,
    Stderr,
    System,
}

impl LogType {
    pub fn as_str(self) -> &'static str {
        match self {
            LogType::Stdout => "stdout",
            LogType::Stderr => "stderr",
            LogType::System => "system",
        }
    }
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted execution-log row. Epic runs leave `task_id` empty and set `epic_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: LogId,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub epic_id: Option<EpicId>,
    pub content: String,
    pub log_type: LogType,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLog {
    pub fn for_task(task_id: TaskId, log_type: LogType, content: impl Into<String>) -> Self {
        Self {
            id: LogId::generate(),
            task_id: Some(task_id),
            epic_id: None,
            content: content.into(),
            log_type,
            created_at: Utc::now(),
        }
    }

    pub fn for_epic(epic_id: EpicId, log_type: LogType, content: impl Into<String>) -> Self {
        Self {
            id: LogId::generate(),
            task_id: None,
            epic_id: Some(epic_id),
            content: content.into(),
            log_type,
            created_at: Utc::now(),
        }
    }
}

/// A multi-repository unit of work driven by a single executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epic {
    pub id: EpicId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub executor_kind: ExecutorKind,
    pub branch_name: String,
    #[serde(default)]
    pub base_branch: Option<String>,
    pub repository_ids: Vec<RepoId>,
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Epic {
    pub fn new(
        id: EpicId,
        title: impl Into<String>,
        executor_kind: ExecutorKind,
        branch_name: impl Into<String>,
        repository_ids: Vec<RepoId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            executor_kind,
            branch_name: branch_name.into(),
            base_branch: None,
            repository_ids,
            worktree_path: None,
            session_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn initial_prompt(&self) -> String {
        match &self.description {
            Some(description) if !description.trim().is_empty() => description.clone(),
            _ => self.title.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_kind_parses_aliases_and_rejects_unknown() {
        assert_eq!("claude".parse::<ExecutorKind>(), Ok(ExecutorKind::ClaudeCode));
        assert_eq!("Claude-Code".parse::<ExecutorKind>(), Ok(ExecutorKind::ClaudeCode));
        assert_eq!(" gemini ".parse::<ExecutorKind>(), Ok(ExecutorKind::Gemini));
        let err = "aider".parse::<ExecutorKind>().expect_err("unknown kind");
        assert!(err.contains("invalid executor kind 'aider'"));
    }

    #[test]
    fn executor_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ExecutorKind::ClaudeCode).expect("serialize");
        assert_eq!(json, "\"claude_code\"");
        assert_eq!(ExecutorKind::Copilot.default_binary(), "copilot");
    }

    #[test]
    fn initial_prompt_prefers_non_blank_description() {
        let task = Task::new(
            TaskId::new("T1"),
            RepoId::new("R1"),
            "Fix the build",
            ExecutorKind::Codex,
            "feature/x",
            "main",
        );
        assert_eq!(task.initial_prompt(), "Fix the build");

        let described = task.clone().with_description("Update Cargo.lock and rerun CI");
        assert_eq!(described.initial_prompt(), "Update Cargo.lock and rerun CI");

        let blank = task.with_description("   ");
        assert_eq!(blank.initial_prompt(), "Fix the build");
    }

    #[test]
    fn new_task_starts_todo_without_worktree() {
        let task = Task::new(
            TaskId::new("T1"),
            RepoId::new("R1"),
            "title",
            ExecutorKind::Gemini,
            "feature/x",
            "main",
        );
        assert_eq!(task.status, TaskStatus::Todo);
        assert!(task.worktree_path.is_none());
        assert!(task.session_id.is_none());
    }

    #[test]
    fn repository_name_defaults_to_directory_name() {
        let repo = Repository::new(RepoId::new("R1"), "/src/widgets", "main");
        assert_eq!(repo.name, "widgets");
    }

    #[test]
    fn queued_message_delivery_records_timestamp() {
        let mut message = QueuedMessage::pending(TaskId::new("T1"), "also fix lint");
        assert_eq!(message.status, MessageStatus::Pending);
        let at = Utc::now();
        message.mark_delivered(at);
        assert_eq!(message.status, MessageStatus::Delivered);
        assert_eq!(message.delivered_at, Some(at));
    }

    #[test]
    fn task_deserializes_with_optional_fields_missing() {
        let task: Task = serde_json::from_str(
            r#"{
                "id": "T9",
                "repository_id": "R1",
                "title": "t",
                "status": "IN_REVIEW",
                "executor_kind": "copilot",
                "branch_name": "b",
                "base_branch": "main",
                "created_at": "2026-02-08T12:30:45Z",
                "updated_at": "2026-02-08T12:30:45Z"
            }"#,
        )
        .expect("deserialize task");
        assert_eq!(task.status, TaskStatus::InReview);
        assert!(task.epic_id.is_none());
        assert!(task.started_at.is_none());
    }
}
