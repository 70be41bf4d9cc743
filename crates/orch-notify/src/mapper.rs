//! Severity and one-line summaries for lifecycle events.

use orch_core::events::{Event, EventKind};
use orch_core::types::LogType;

use crate::types::Severity;

pub fn severity_for_event(event: &Event) -> Severity {
    match &event.kind {
        EventKind::ExecutionLog { log } => match log.log_type {
            LogType::Stderr => Severity::Warning,
            LogType::Stdout => Severity::Debug,
            LogType::System => Severity::Info,
        },
        EventKind::MessageFailed { .. } => Severity::Error,
        EventKind::ExecutorStopped { .. } => Severity::Debug,
        _ => Severity::Info,
    }
}

pub fn summarize_event(event: &Event) -> String {
    match &event.kind {
        EventKind::ExecutionLog { log } => format!("[{}] {}", log.log_type, log.content),
        EventKind::TaskStatusChanged { from, to } => format!("task {from} -> {to}"),
        EventKind::EpicStatusChanged { from, to } => format!("epic {from} -> {to}"),
        EventKind::MessageQueued { message_id } => format!("message {message_id} queued"),
        EventKind::MessageDelivered { message_id } => format!("message {message_id} delivered"),
        EventKind::MessageFailed { message_id, reason } => {
            format!("message {message_id} failed: {reason}")
        }
        EventKind::SessionCaptured { session_id } => format!("session {session_id} captured"),
        EventKind::ExecutorStarted { kind, run_id } => format!("{kind} executor run {run_id} started"),
        EventKind::ExecutorStopped { run_id } => format!("executor run {run_id} stopped"),
    }
}
