//! Orchestration daemon crate: task and epic orchestrators on top of the
//! agent adapters, git worktrees and the record stores.

pub mod context;
pub mod epic;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod persistence;
pub mod registry;
pub mod settings;
pub mod state_machine;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::*;
pub use epic::*;
pub use error::*;
pub use orchestrator::*;
pub use persistence::*;
pub use registry::*;
pub use settings::*;
pub use state_machine::*;
pub use store::*;

#[cfg(test)]
mod tests {
    use super::{is_transition_allowed, render_statuses, TaskOperation};
    use orch_core::state::TaskStatus;

    #[test]
    fn crate_root_reexports_state_machine_helpers() {
        assert!(is_transition_allowed(TaskStatus::InReview, TaskStatus::Done));
        assert_eq!(
            render_statuses(TaskOperation::Pause.allowed_from()),
            "IN_PROGRESS"
        );
    }
}
