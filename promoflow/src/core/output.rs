//! Action output type with factory methods.

use super::{Artifact, StageStatus};
use crate::errors::ApprovalError;
use serde::{Deserialize, Serialize};

/// The output of a single action execution.
///
/// `ActionOutput` is created through its factory methods; the engine
/// maps it onto the action's terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutput {
    /// The terminal status of the action.
    pub status: StageStatus,

    /// Artifacts produced by the action.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,

    /// Error message (for failed actions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Why the action stopped the pipeline (for stopped actions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<ApprovalError>,
}

impl ActionOutput {
    /// Creates a successful output carrying artifacts.
    #[must_use]
    pub fn succeeded(artifacts: Vec<Artifact>) -> Self {
        Self {
            status: StageStatus::Succeeded,
            artifacts,
            error: None,
            stop_reason: None,
        }
    }

    /// Creates a successful output with no artifacts.
    #[must_use]
    pub fn succeeded_empty() -> Self {
        Self::succeeded(Vec::new())
    }

    /// Creates a failure output with an error message.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            artifacts: Vec::new(),
            error: Some(error.into()),
            stop_reason: None,
        }
    }

    /// Creates a stopped output carrying the approval outcome.
    #[must_use]
    pub fn stopped(reason: ApprovalError) -> Self {
        Self {
            status: StageStatus::Stopped,
            artifacts: Vec::new(),
            error: Some(reason.to_string()),
            stop_reason: Some(reason),
        }
    }

    /// Returns true if the action succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeded_output() {
        let output = ActionOutput::succeeded(vec![Artifact::new("SourceOutput")]);

        assert!(output.is_success());
        assert_eq!(output.artifacts.len(), 1);
        assert!(output.error.is_none());
    }

    #[test]
    fn test_failed_output() {
        let output = ActionOutput::failed("docker build exited with 1");

        assert_eq!(output.status, StageStatus::Failed);
        assert_eq!(output.error.as_deref(), Some("docker build exited with 1"));
        assert!(output.artifacts.is_empty());
    }

    #[test]
    fn test_stopped_output_keeps_reason() {
        let reason = ApprovalError::Expired {
            gate: "Validation".to_string(),
            timeout_ms: 1000,
        };
        let output = ActionOutput::stopped(reason.clone());

        assert_eq!(output.status, StageStatus::Stopped);
        assert_eq!(output.stop_reason, Some(reason));
        assert!(output.error.unwrap().contains("expired"));
    }

    #[test]
    fn test_output_serialization_skips_empty_fields() {
        let json = serde_json::to_value(ActionOutput::succeeded_empty()).unwrap();

        assert_eq!(json, serde_json::json!({"status": "succeeded"}));
    }
}
