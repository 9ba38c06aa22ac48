//! Lifecycle events emitted by the orchestrator.
//!
//! Sinks are injected explicitly into each pipeline run, bridge, and
//! approval service; there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;

/// Well-known event type names.
pub mod names {
    /// A pipeline execution began.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A pipeline execution reached a terminal state.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A stage began.
    pub const STAGE_STARTED: &str = "stage.started";
    /// Every action in a stage succeeded.
    pub const STAGE_SUCCEEDED: &str = "stage.succeeded";
    /// A stage failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage was stopped by an approval gate.
    pub const STAGE_STOPPED: &str = "stage.stopped";
    /// An action began.
    pub const ACTION_STARTED: &str = "action.started";
    /// An action succeeded.
    pub const ACTION_SUCCEEDED: &str = "action.succeeded";
    /// An action failed.
    pub const ACTION_FAILED: &str = "action.failed";
    /// An action stopped the pipeline.
    pub const ACTION_STOPPED: &str = "action.stopped";
    /// An approval request was opened.
    pub const APPROVAL_REQUESTED: &str = "approval.requested";
    /// An approval request reached a terminal state.
    pub const APPROVAL_DECIDED: &str = "approval.decided";
    /// Reviewer notification could not be delivered.
    pub const APPROVAL_NOTIFY_FAILED: &str = "approval.notify_failed";
    /// A value was written to the parameter bridge.
    pub const BRIDGE_PUT: &str = "bridge.put";
}

/// Returns the default sink used when a caller does not inject one.
#[must_use]
pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}
