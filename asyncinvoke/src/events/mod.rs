//! Event sink system for observability.
//!
//! Futures and tasks report lifecycle transitions (`invocation.completed`,
//! `invocation.failed`, `invocation.cancelled`, `invocation.cancel_escalated`)
//! through an [`EventSink`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use parking_lot::RwLock;
use std::sync::Arc;

/// Event emitted when an invocation completes normally.
pub const EVENT_COMPLETED: &str = "invocation.completed";
/// Event emitted when an invocation completes exceptionally.
pub const EVENT_FAILED: &str = "invocation.failed";
/// Event emitted when an invocation is cancelled locally.
pub const EVENT_CANCELLED: &str = "invocation.cancelled";
/// Event emitted when cancellation is escalated to the cancellable context.
pub const EVENT_CANCEL_ESCALATED: &str = "invocation.cancel_escalated";
/// Event emitted when a queued cancellation request is forwarded.
pub const EVENT_CANCEL_FORWARDED: &str = "invocation.cancel_forwarded";

static GLOBAL_EVENT_SINK: RwLock<Option<Arc<dyn EventSink>>> = RwLock::new(None);

/// Sets the current global event sink.
pub fn set_event_sink(sink: Arc<dyn EventSink>) {
    *GLOBAL_EVENT_SINK.write() = Some(sink);
}

/// Clears the current global event sink.
pub fn clear_event_sink() {
    *GLOBAL_EVENT_SINK.write() = None;
}

/// Gets the current global event sink.
///
/// Returns a `NoOpEventSink` if no sink is set.
pub fn get_event_sink() -> Arc<dyn EventSink> {
    GLOBAL_EVENT_SINK
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(NoOpEventSink))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_sink_roundtrip() {
        let sink = Arc::new(CollectingEventSink::new());
        set_event_sink(sink.clone());

        get_event_sink().try_emit("test.event", Some(serde_json::json!({"key": "value"})));
        clear_event_sink();
        get_event_sink().try_emit("test.dropped", None);

        // Other tests may emit through the global sink concurrently.
        assert_eq!(sink.count_of("test.event"), 1);
        assert_eq!(sink.count_of("test.dropped"), 0);
    }
}
