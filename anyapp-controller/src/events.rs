//! Application events
//!
//! Events describe state transitions of an application as seen from this zone.
//! They are logged and, with [`RecordingEvents`], kept for the REST API.

use anyapp_core::api::EventRecord;
use anyapp_core::ApplicationId;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use tracing::info;

pub const LOCAL_STATE_CHANGE_REASON: &str = "Local state change";
pub const GLOBAL_STATE_CHANGE_REASON: &str = "Global state change";

/// Events kept per application by default
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub reason: String,
    pub msg: String,
}

impl Event {
    pub fn local(msg: impl Into<String>) -> Self {
        Self {
            reason: LOCAL_STATE_CHANGE_REASON.to_string(),
            msg: msg.into(),
        }
    }

    pub fn global(msg: impl Into<String>) -> Self {
        Self {
            reason: GLOBAL_STATE_CHANGE_REASON.to_string(),
            msg: msg.into(),
        }
    }
}

/// Sink for application events
pub trait Events: Send + Sync {
    fn emit(&self, application_id: &ApplicationId, event: &Event);

    /// Most recent events of an application, oldest first
    fn recent(&self, _application_id: &ApplicationId) -> Vec<EventRecord> {
        Vec::new()
    }
}

/// Logs events through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl Events for TracingEvents {
    fn emit(&self, application_id: &ApplicationId, event: &Event) {
        info!(application = %application_id, reason = %event.reason, "{}", event.msg);
    }
}

/// Logs events and keeps the last `capacity` per application
#[derive(Debug)]
pub struct RecordingEvents {
    capacity: usize,
    events: Mutex<HashMap<ApplicationId, VecDeque<EventRecord>>>,
}

impl RecordingEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(HashMap::new()),
        }
    }

    /// All events recorded for an application
    pub fn events_for(&self, application_id: &ApplicationId) -> Vec<EventRecord> {
        self.recent(application_id)
    }
}

impl Default for RecordingEvents {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl Events for RecordingEvents {
    fn emit(&self, application_id: &ApplicationId, event: &Event) {
        TracingEvents.emit(application_id, event);

        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = events.entry(application_id.clone()).or_default();
        if queue.len() == self.capacity {
            queue.pop_front();
        }
        queue.push_back(EventRecord {
            timestamp: Utc::now(),
            reason: event.reason.clone(),
            msg: event.msg.clone(),
        });
    }

    fn recent(&self, application_id: &ApplicationId) -> Vec<EventRecord> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events
            .get(application_id)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_reasons() {
        assert_eq!(Event::local("x").reason, "Local state change");
        assert_eq!(Event::global("y").reason, "Global state change");
    }

    #[test]
    fn test_recording_events_keeps_last_n() {
        let events = RecordingEvents::new(2);
        let id = ApplicationId::new("default", "web");
        events.emit(&id, &Event::local("one"));
        events.emit(&id, &Event::local("two"));
        events.emit(&id, &Event::global("three"));

        let recorded = events.events_for(&id);
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].msg, "two");
        assert_eq!(recorded[1].msg, "three");
        assert_eq!(recorded[1].reason, GLOBAL_STATE_CHANGE_REASON);
    }

    #[test]
    fn test_recording_events_per_application() {
        let events = RecordingEvents::default();
        events.emit(&ApplicationId::new("default", "a"), &Event::local("a"));
        assert!(events.recent(&ApplicationId::new("default", "b")).is_empty());
        assert_eq!(events.recent(&ApplicationId::new("default", "a")).len(), 1);
    }

    #[test]
    fn test_tracing_events_has_no_history() {
        let id = ApplicationId::new("default", "web");
        TracingEvents.emit(&id, &Event::local("hello"));
        assert!(TracingEvents.recent(&id).is_empty());
    }
}
