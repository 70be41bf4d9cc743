use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::TaskStatus;
use crate::types::{EpicId, EventId, ExecutionLog, ExecutorKind, MessageId, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EventKind {
    ExecutionLog {
        log: ExecutionLog,
    },
    TaskStatusChanged {
        from: TaskStatus,
        to: TaskStatus,
    },
    EpicStatusChanged {
        from: TaskStatus,
        to: TaskStatus,
    },
    MessageQueued {
        message_id: MessageId,
    },
    MessageDelivered {
        message_id: MessageId,
    },
    MessageFailed {
        message_id: MessageId,
        reason: String,
    },
    SessionCaptured {
        session_id: String,
    },
    ExecutorStarted {
        kind: ExecutorKind,
        run_id: u64,
    },
    ExecutorStopped {
        run_id: u64,
    },
}

impl EventKind {
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::ExecutionLog { .. } => "execution_log",
            EventKind::TaskStatusChanged { .. } => "task_status_changed",
            EventKind::EpicStatusChanged { .. } => "epic_status_changed",
            EventKind::MessageQueued { .. } => "message_queued",
            EventKind::MessageDelivered { .. } => "message_delivered",
            EventKind::MessageFailed { .. } => "message_failed",
            EventKind::SessionCaptured { .. } => "session_captured",
            EventKind::ExecutorStarted { .. } => "executor_started",
            EventKind::ExecutorStopped { .. } => "executor_stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub task_id: Option<TaskId>,
    pub epic_id: Option<EpicId>,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn for_task(task_id: TaskId, kind: EventKind) -> Self {
        Self {
            id: EventId::generate(),
            task_id: Some(task_id),
            epic_id: None,
            at: Utc::now(),
            kind,
        }
    }

    pub fn for_epic(epic_id: EpicId, kind: EventKind) -> Self {
        Self {
            id: EventId::generate(),
            task_id: None,
            epic_id: Some(epic_id),
            at: Utc::now(),
            kind,
        }
    }

    /// Wraps a log row, inheriting its owner ids and timestamp.
    pub fn log(log: ExecutionLog) -> Self {
        Self {
            id: EventId::generate(),
            task_id: log.task_id.clone(),
            epic_id: log.epic_id.clone(),
            at: log.created_at,
            kind: EventKind::ExecutionLog { log },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Event, EventKind};
    use crate::state::TaskStatus;
    use crate::types::{ExecutionLog, LogType, TaskId};

    #[test]
    fn status_change_serializes_with_type_tag() {
        let event = Event::for_task(
            TaskId::new("T1"),
            EventKind::TaskStatusChanged {
                from: TaskStatus::InProgress,
                to: TaskStatus::InReview,
            },
        );
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["kind"]["type"], "task_status_changed");
        assert_eq!(json["kind"]["to"], "IN_REVIEW");
        assert_eq!(json["task_id"], "T1");
    }

    #[test]
    fn log_event_inherits_owner_and_timestamp() {
        let log = ExecutionLog::for_task(TaskId::new("T7"), LogType::Stderr, "boom");
        let at = log.created_at;
        let event = Event::log(log);
        assert_eq!(event.task_id, Some(TaskId::new("T7")));
        assert_eq!(event.at, at);
        assert_eq!(event.kind.tag(), "execution_log");
    }

    #[test]
    fn event_roundtrip_through_json() {
        let event = Event::for_task(
            TaskId::new("T2"),
            EventKind::SessionCaptured {
                session_id: "abc".to_string(),
            },
        );
        let encoded = serde_json::to_string(&event).expect("serialize");
        let decoded: Event = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, event);
    }
}
