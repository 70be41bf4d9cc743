use std::path::PathBuf;

use orch_agents::ExecutorError;
use orch_core::state::TaskStatus;
use orch_core::types::ExecutorKind;
use orch_git::GitError;

use crate::state_machine::{render_statuses, StateMachineError, TaskOperation};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(
        "cannot {operation} {id}: status is {current}, expected {}",
        render_statuses(.allowed)
    )]
    InvalidTransition {
        id: String,
        operation: TaskOperation,
        current: TaskStatus,
        allowed: &'static [TaskStatus],
    },
    #[error("task {task_id} not found")]
    TaskNotFound { task_id: String },
    #[error("epic {epic_id} not found")]
    EpicNotFound { epic_id: String },
    #[error("repository {repo_id} not found")]
    RepositoryNotFound { repo_id: String },
    #[error("{kind} agent is disabled")]
    AgentDisabled { kind: ExecutorKind },
    #[error("{id} has no worktree")]
    MissingWorktree { id: String },
    #[error("message content is empty")]
    EmptyMessage,
    #[error("failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    pub fn invalid_transition(
        id: impl Into<String>,
        operation: TaskOperation,
        current: TaskStatus,
    ) -> Self {
        Self::InvalidTransition {
            id: id.into(),
            operation,
            current,
            allowed: operation.allowed_from(),
        }
    }
}

#[cfg(test)]
mod tests {
    use orch_core::state::TaskStatus;
    use orch_core::types::ExecutorKind;

    use super::OrchestratorError;
    use crate::state_machine::TaskOperation;

    #[test]
    fn invalid_transition_names_current_and_allowed_states() {
        let err =
            OrchestratorError::invalid_transition("T1", TaskOperation::Finish, TaskStatus::InProgress);
        assert_eq!(
            err.to_string(),
            "cannot finish T1: status is IN_PROGRESS, expected IN_REVIEW"
        );

        let err = OrchestratorError::invalid_transition("T2", TaskOperation::Resume, TaskStatus::Todo);
        assert_eq!(
            err.to_string(),
            "cannot resume T2: status is TODO, expected IN_PROGRESS or IN_REVIEW"
        );
    }

    #[test]
    fn agent_disabled_names_the_kind() {
        let err = OrchestratorError::AgentDisabled {
            kind: ExecutorKind::Copilot,
        };
        assert_eq!(err.to_string(), "copilot agent is disabled");
    }
}
