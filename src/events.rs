//! Event recording
//!
//! Components receive an [`EventRecorder`] bound to their name instead of a
//! process-wide broadcaster. The sink behind it is created once at startup.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => f.write_str("Normal"),
            EventType::Warning => f.write_str("Warning"),
        }
    }
}

/// One recorded event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub component: String,
    pub type_: EventType,
    /// Object the event is about, `namespace/name`
    pub object: Option<String>,
    pub reason: String,
    pub message: String,
}

/// Destination of recorded events
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// Sink writing events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: Event) {
        match event.type_ {
            EventType::Normal => tracing::info!(
                component = %event.component,
                object = event.object.as_deref().unwrap_or("-"),
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => tracing::warn!(
                component = %event.component,
                object = event.object.as_deref().unwrap_or("-"),
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

/// Records events on behalf of one component
#[derive(Clone)]
pub struct EventRecorder {
    component: String,
    object: Option<String>,
    sink: Arc<dyn EventSink>,
}

impl EventRecorder {
    pub fn for_component(sink: Arc<dyn EventSink>, component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            object: None,
            sink,
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Recorder for events about one object
    pub fn about(&self, object: impl Into<String>) -> Self {
        Self {
            component: self.component.clone(),
            object: Some(object.into()),
            sink: self.sink.clone(),
        }
    }

    pub fn record(&self, type_: EventType, reason: impl Into<String>, message: impl Into<String>) {
        self.sink.publish(Event {
            component: self.component.clone(),
            type_,
            object: self.object.clone(),
            reason: reason.into(),
            message: message.into(),
        });
    }
}
