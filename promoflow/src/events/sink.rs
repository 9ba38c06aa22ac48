//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::Level;

/// Receives lifecycle events.
///
/// `emit` is awaited by the engine at lifecycle points; `try_emit` is used
/// from synchronous code and must never fail.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "stage.started")
    /// * `data` - Optional event data
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits an event without awaiting. Errors are suppressed.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// A sink that forwards events to `tracing`.
///
/// Failure events (`*.failed`, `*.stopped`, `*.notify_failed`) are always
/// logged at `WARN` regardless of the configured level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        let is_failure = event_type.ends_with(".failed")
            || event_type.ends_with(".stopped")
            || event_type.ends_with(".notify_failed");
        let data = data.map(Value::to_string).unwrap_or_default();

        if is_failure {
            tracing::warn!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
            return;
        }

        match self.level {
            Level::TRACE | Level::DEBUG => {
                tracing::debug!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
            }
            _ => {
                tracing::info!(event_type = %event_type, event_data = %data, "Event: {}", event_type);
            }
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// A sink that records events in memory, for tests and audit trails.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Returns the collected event types in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_logging_sink_handles_failures_and_plain_events() {
        let sink = LoggingEventSink::debug();
        sink.emit("action.failed", Some(json!({"error": "boom"}))).await;
        sink.try_emit("stage.started", None);
    }

    #[tokio::test]
    async fn test_collecting_sink_preserves_order() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("stage.started", None).await;
        sink.try_emit("action.started", Some(json!({"action": "DockerBuild"})));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.event_types(), vec!["stage.started", "action.started"]);
    }

    #[tokio::test]
    async fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        sink.emit("approval.requested", None).await;
        sink.emit("approval.decided", None).await;
        sink.emit("bridge.put", None).await;

        assert_eq!(sink.events_of_type("approval.").len(), 2);
        assert_eq!(sink.events_of_type("bridge.").len(), 1);
    }
}
