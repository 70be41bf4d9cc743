use std::sync::{Arc, Mutex, MutexGuard};

use orch_core::events::Event;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::NotifyError;
use crate::mapper::{severity_for_event, summarize_event};
use crate::types::Severity;

pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// Destination for execution logs and lifecycle events. Publishing never
/// blocks on consumers.
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn publish(&self, event: &Event) -> Result<(), NotifyError>;
}

/// Fan-out to any number of live subscribers. Events published while nobody
/// is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<Event>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl EventSink for BroadcastSink {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn publish(&self, event: &Event) -> Result<(), NotifyError> {
        // Err only means there are no receivers right now.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Writes each event to the `tracing` subscriber at its mapped severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn publish(&self, event: &Event) -> Result<(), NotifyError> {
        let summary = summarize_event(event);
        let task_id = event.task_id.as_ref().map(|id| id.0.as_str());
        let epic_id = event.epic_id.as_ref().map(|id| id.0.as_str());
        let kind = event.kind.tag();
        match severity_for_event(event) {
            Severity::Debug => debug!(?task_id, ?epic_id, kind, "{summary}"),
            Severity::Info => info!(?task_id, ?epic_id, kind, "{summary}"),
            Severity::Warning => warn!(?task_id, ?epic_id, kind, "{summary}"),
            Severity::Error => error!(?task_id, ?epic_id, kind, "{summary}"),
        }
        Ok(())
    }
}

/// Keeps every event in memory; used by tests and embedders.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Events whose kind tag equals `tag`, e.g. `"task_status_changed"`.
    pub fn events_of(&self, tag: &str) -> Vec<Event> {
        self.lock()
            .iter()
            .filter(|event| event.kind.tag() == tag)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn publish(&self, event: &Event) -> Result<(), NotifyError> {
        self.lock().push(event.clone());
        Ok(())
    }
}

/// Delivers each event to every inner sink. One failing sink does not stop
/// delivery to the rest.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn dispatch(&self, event: &Event) -> Vec<(&'static str, Result<(), NotifyError>)> {
        self.sinks
            .iter()
            .map(|sink| (sink.name(), sink.publish(event)))
            .collect()
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field(
                "sinks",
                &self.sinks.iter().map(|sink| sink.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl EventSink for FanoutSink {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn publish(&self, event: &Event) -> Result<(), NotifyError> {
        let mut first_error = None;
        for (sink, result) in self.dispatch(event) {
            if let Err(err) = result {
                warn!(sink, error = %err, kind = event.kind.tag(), "event sink rejected event");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
