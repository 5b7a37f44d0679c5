//! Where invocation lifecycle events go.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

/// Receives invocation lifecycle events.
///
/// Futures and workers report through [`try_emit`](Self::try_emit) while
/// holding no locks; it must neither block nor panic. Async callers such as
/// the cancellation forwarder use [`emit`](Self::emit), which by default
/// delegates to `try_emit`.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Records an event from synchronous code.
    fn try_emit(&self, event_type: &str, data: Option<Value>);

    /// Records an event from async code.
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.try_emit(event_type, data);
    }
}

/// Drops every event. The global default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes every event as a `tracing` record, at `INFO` or, when verbose, `DEBUG`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink {
    verbose: bool,
}

impl LoggingEventSink {
    /// A sink logging at `DEBUG`, for high-volume invokers.
    #[must_use]
    pub fn verbose() -> Self {
        Self { verbose: true }
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        if self.verbose {
            debug!(event_type, event_data = ?data, "Invocation event");
        } else {
            info!(event_type, event_data = ?data, "Invocation event");
        }
    }
}

/// Keeps events in memory so tests can assert on them.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of events received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Returns how many events of exactly `event_type` were received.
    #[must_use]
    pub fn count_of(&self, event_type: &str) -> usize {
        self.events.lock().iter().filter(|(t, _)| t == event_type).count()
    }

    /// Returns the payload of the last event of `event_type`.
    #[must_use]
    pub fn last_of(&self, event_type: &str) -> Option<Value> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|(t, _)| t == event_type)
            .and_then(|(_, data)| data.clone())
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.lock().push((event_type.to_string(), data));
    }
}
