//! Task lifecycle states.

use serde::{Deserialize, Serialize};

/// Lifecycle: `Todo -> InProgress <-> InReview -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, not yet started.
    Todo,
    /// An agent is (or may be) working in the task worktree.
    InProgress,
    /// The agent finished its turn; waiting on a human.
    InReview,
    /// Finished; worktree and branch are being cleaned up.
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::InReview => "IN_REVIEW",
            TaskStatus::Done => "DONE",
        }
    }

    /// A worktree is materialized exactly while the task is in one of these states.
    pub fn has_worktree(self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::InReview)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done)
    }

    /// States in which follow-up messages may be queued.
    pub fn accepts_messages(self) -> bool {
        self.has_worktree()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().replace('-', "_").as_str() {
            "TODO" => Ok(TaskStatus::Todo),
            "IN_PROGRESS" | "INPROGRESS" => Ok(TaskStatus::InProgress),
            "IN_REVIEW" | "INREVIEW" => Ok(TaskStatus::InReview),
            "DONE" => Ok(TaskStatus::Done),
            other => Err(format!(
                "invalid task status '{other}'. valid values: TODO, IN_PROGRESS, IN_REVIEW, DONE"
            )),
        }
    }
}
