//! Task lifecycle guards and transitions.
//!
//! ```text
//! TODO -> IN_PROGRESS <-> IN_REVIEW -> DONE
//!            ^   |
//!            +---+  (pause / resume)
//! ```

use chrono::{DateTime, Utc};
use orch_core::state::TaskStatus;
use orch_core::types::{Epic, Task};

/// Caller-facing operations, each guarded by the statuses it may start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOperation {
    Start,
    Pause,
    Resume,
    Finish,
    QueueMessage,
}

impl TaskOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskOperation::Start => "start",
            TaskOperation::Pause => "pause",
            TaskOperation::Resume => "resume",
            TaskOperation::Finish => "finish",
            TaskOperation::QueueMessage => "queue a message for",
        }
    }

    pub fn allowed_from(self) -> &'static [TaskStatus] {
        match self {
            TaskOperation::Start => &[TaskStatus::Todo],
            TaskOperation::Pause => &[TaskStatus::InProgress],
            TaskOperation::Resume | TaskOperation::QueueMessage => {
                &[TaskStatus::InProgress, TaskStatus::InReview]
            }
            TaskOperation::Finish => &[TaskStatus::InReview],
        }
    }

    pub fn permits(self, current: TaskStatus) -> bool {
        self.allowed_from().contains(&current)
    }
}

impl std::fmt::Display for TaskOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn render_statuses(statuses: &[TaskStatus]) -> String {
    statuses
        .iter()
        .map(|status| status.as_str())
        .collect::<Vec<_>>()
        .join(" or ")
}

pub fn is_transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    matches!(
        (from, to),
        (Todo, InProgress)
            | (InProgress, InProgress)
            | (InProgress, InReview)
            | (InReview, InProgress)
            | (InReview, Done)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

impl StateTransition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

/// Lifecycle fields shared by tasks and epics.
pub trait Lifecycle {
    fn status(&self) -> TaskStatus;
    fn apply(&mut self, to: TaskStatus, at: DateTime<Utc>);
}

macro_rules! impl_lifecycle {
    ($ty:ty) => {
        impl Lifecycle for $ty {
            fn status(&self) -> TaskStatus {
                self.status
            }

            fn apply(&mut self, to: TaskStatus, at: DateTime<Utc>) {
                if to == TaskStatus::InProgress && self.started_at.is_none() {
                    self.started_at = Some(at);
                }
                if to == TaskStatus::Done {
                    self.worktree_path = None;
                    self.completed_at = Some(at);
                }
                self.status = to;
                self.updated_at = at;
            }
        }
    };
}

impl_lifecycle!(Task);
impl_lifecycle!(Epic);

/// Move `record` to `to`, keeping timestamps and the worktree invariant in
/// step. Moving to DONE clears the worktree path.
pub fn transition<R: Lifecycle>(
    record: &mut R,
    to: TaskStatus,
    at: DateTime<Utc>,
) -> Result<StateTransition, StateMachineError> {
    let from = record.status();
    if !is_transition_allowed(from, to) {
        return Err(StateMachineError::InvalidTransition { from, to });
    }
    record.apply(to, at);
    Ok(StateTransition { from, to, at })
}
