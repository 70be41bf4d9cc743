pub mod config;
pub mod events;
pub mod state;
pub mod types;
pub mod validation;

pub use config::*;
pub use events::*;
pub use state::*;
pub use types::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::{parse_config, ExecutorKind, TaskId, TaskStatus, Validate};
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_core_types() {
        let _ = TypeId::of::<TaskId>();
        let _ = TypeId::of::<TaskStatus>();
        let _ = TypeId::of::<ExecutorKind>();
    }

    #[test]
    fn crate_root_reexports_parse_and_validate_helpers() {
        let mut config = parse_config(
            r#"
[agents.claude]
enabled = true
path = "claude"

[worktrees]
root = ".orch/wt"
"#,
        )
        .expect("parse config");

        assert!(config.validate().is_empty());

        config.executor.session_poll_interval_ms = 0;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|issue| issue.code == "executor.session_poll_interval.zero"));
    }
}
