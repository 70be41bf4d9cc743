//! Validation for orchestrator configuration and records.

use serde::{Deserialize, Serialize};

use crate::config::OrchConfig;
use crate::types::{ExecutorKind, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for OrchConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if ExecutorKind::ALL
            .iter()
            .all(|kind| !self.agents.get(*kind).enabled)
        {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "agents.none_enabled",
                message: "no agents enabled; tasks cannot be started".to_string(),
            });
        }

        for kind in ExecutorKind::ALL {
            let settings = self.agents.get(kind);
            if settings.enabled && settings.path.trim().is_empty() {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "agents.path.empty",
                    message: format!("agent {kind} is enabled but has an empty path"),
                });
            }
        }

        if self.executor.request_timeout_secs == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "executor.request_timeout.zero",
                message: "request_timeout_secs must be greater than zero".to_string(),
            });
        }

        if self.executor.session_watch_timeout_secs == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "executor.session_watch_timeout.zero",
                message: "session_watch_timeout_secs must be greater than zero".to_string(),
            });
        }

        if self.executor.session_poll_interval_ms == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "executor.session_poll_interval.zero",
                message: "session_poll_interval_ms must be greater than zero".to_string(),
            });
        }

        if self.worktrees.root.as_os_str().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "worktrees.root.empty",
                message: "worktree root must not be empty".to_string(),
            });
        }

        issues
    }
}

impl Validate for Task {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.title.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "task.title.empty",
                message: "task title must not be empty".to_string(),
            });
        }

        if self.branch_name.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "task.branch_name.empty",
                message: "task branch name must not be empty".to_string(),
            });
        } else if self.branch_name.contains(char::is_whitespace)
            || self.branch_name.contains("..")
        {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "task.branch_name.invalid",
                message: format!("'{}' is not a valid branch name", self.branch_name),
            });
        }

        if self.base_branch.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "task.base_branch.empty",
                message: "task base branch must not be empty".to_string(),
            });
        }

        if self.status.has_worktree() != self.worktree_path.is_some() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "task.worktree_path.inconsistent",
                message: format!(
                    "task in status {} {} a worktree path",
                    self.status,
                    if self.worktree_path.is_some() {
                        "unexpectedly has"
                    } else {
                        "is missing"
                    }
                ),
            });
        }

        issues
    }
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues
        .iter()
        .any(|issue| issue.level == ValidationLevel::Error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskStatus;
    use crate::types::{RepoId, TaskId};
    use std::path::PathBuf;

    fn mk_task() -> Task {
        Task::new(
            TaskId::new("T1"),
            RepoId::new("R1"),
            "Add retries",
            ExecutorKind::ClaudeCode,
            "feature/retries",
            "main",
        )
    }

    #[test]
    fn default_config_is_valid() {
        assert!(OrchConfig::default().validate().is_empty());
    }

    #[test]
    fn flags_zero_timeouts_and_empty_paths() {
        let mut config = OrchConfig::default();
        config.executor.request_timeout_secs = 0;
        config.agents.get_mut(ExecutorKind::Gemini).path = " ".to_string();

        let issues = config.validate();
        assert!(has_errors(&issues));
        assert!(issues
            .iter()
            .any(|issue| issue.code == "executor.request_timeout.zero"));
        assert!(issues.iter().any(|issue| issue.code == "agents.path.empty"));
    }

    #[test]
    fn warns_when_every_agent_is_disabled() {
        let mut config = OrchConfig::default();
        for kind in ExecutorKind::ALL {
            config.agents.get_mut(kind).enabled = false;
        }
        let issues = config.validate();
        assert!(!has_errors(&issues));
        assert!(issues.iter().any(|issue| issue.code == "agents.none_enabled"));
    }

    #[test]
    fn task_branch_names_are_checked() {
        assert!(mk_task().validate().is_empty());

        let mut task = mk_task();
        task.branch_name = "feature/has space".to_string();
        assert!(task
            .validate()
            .iter()
            .any(|issue| issue.code == "task.branch_name.invalid"));
    }

    #[test]
    fn task_worktree_invariant_is_reported() {
        let mut task = mk_task();
        task.status = TaskStatus::Done;
        task.worktree_path = Some(PathBuf::from("/tmp/wt"));
        let issues = task.validate();
        assert!(!has_errors(&issues));
        assert!(issues
            .iter()
            .any(|issue| issue.code == "task.worktree_path.inconsistent"));
    }
}
