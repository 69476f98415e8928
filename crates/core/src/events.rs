use crate::types::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// An event emitted while a workflow runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

impl Event {
    pub fn new(run_id: RunId, event_type: EventType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id,
            timestamp: Utc::now(),
            event_type,
        }
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    // Run lifecycle events
    RunStarted {
        workflow: String,
        components: usize,
    },
    RunCompleted {
        duration_ms: u64,
    },
    RunFailed {
        error: String,
        duration_ms: u64,
    },
    RunCancelled {
        reason: String,
    },

    // Component lifecycle events
    NodeStarted {
        component: String,
    },
    NodeSucceeded {
        component: String,
        duration_ms: u64,
    },
    NodeFailed {
        component: String,
        error: String,
    },
    NodeSkipped {
        component: String,
        reason: String,
    },
}

/// Receives run events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: Event) {}
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far, in emission order
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            RunId::new(),
            EventType::NodeSkipped {
                component: "aggregate".to_string(),
                reason: "dependency failed".to_string(),
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"]["type"], "node_skipped");
        assert_eq!(json["event_type"]["component"], "aggregate");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type, event.event_type);
    }

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        let run_id = RunId::new();

        sink.emit(Event::new(run_id, EventType::RunCancelled { reason: "a".into() }));
        sink.emit(Event::new(run_id, EventType::RunCompleted { duration_ms: 1 }));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event_type, EventType::RunCancelled { .. }));
        assert!(matches!(events[1].event_type, EventType::RunCompleted { .. }));
    }
}
