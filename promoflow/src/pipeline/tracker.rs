//! Live execution state and the final execution report.

use super::action::TriggerInputs;
use super::spec::StageSpec;
use crate::core::{ActionKind, ActionStatus, Artifact, ExecutionStatus, StageStatus};
use crate::errors::{ActionExecutionError, ApprovalError, PromoflowError};
use crate::utils::iso_timestamp;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// State of one action within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// The action name.
    pub name: String,
    /// The action's run order.
    pub run_order: u32,
    /// The action kind.
    pub kind: ActionKind,
    /// Current status.
    pub status: ActionStatus,
    /// When the action was dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// When the action reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    /// Wall-clock duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// Failure or stop message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Names of artifacts the action produced.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
}

/// State of one stage within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// The stage name.
    pub name: String,
    /// Current status.
    pub status: StageStatus,
    /// When the stage began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// When the stage reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    /// Actions in declaration order.
    pub actions: Vec<ActionRecord>,
}

impl StageRecord {
    /// Returns the record for an action.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionRecord> {
        self.actions.iter().find(|a| a.name == name)
    }
}

/// The stage and action that failed a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// The failing stage.
    pub stage: String,
    /// The failing action.
    pub action: String,
    /// The action's error message.
    pub message: String,
}

/// The gate that stopped a run and its terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopInfo {
    /// The stage holding the gate.
    pub stage: String,
    /// The gate action.
    pub action: String,
    /// The gate's terminal reason.
    pub reason: ApprovalError,
}

/// Snapshot of a pipeline execution.
///
/// While a run is in flight the snapshot shows which stages are pending,
/// running or finished. Once terminal it names the failing stage and
/// action (or the stopping gate) and lists the artifacts that exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Unique execution identifier.
    pub execution_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// Overall status.
    pub status: ExecutionStatus,
    /// The trigger that started the run.
    pub trigger: TriggerInputs,
    /// Pipeline tags such as the target environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// When the run began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// When the run reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    /// Stage records in pipeline order.
    pub stages: Vec<StageRecord>,
    /// Artifacts produced so far, by name.
    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,
    /// Set when a stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
    /// Set when an approval gate stopped the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopInfo>,
}

impl ExecutionReport {
    /// Returns a stage record.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns a stage's status.
    #[must_use]
    pub fn stage_status(&self, name: &str) -> Option<StageStatus> {
        self.stage(name).map(|s| s.status)
    }

    /// Returns an action record.
    #[must_use]
    pub fn action(&self, stage: &str, action: &str) -> Option<&ActionRecord> {
        self.stage(stage).and_then(|s| s.action(action))
    }

    /// Returns an artifact produced during the run.
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    /// Converts a failed or stopped report into its error.
    ///
    /// # Errors
    ///
    /// Returns `PromoflowError::Action` for a failed run and
    /// `PromoflowError::Approval` for a stopped one.
    pub fn into_result(self) -> Result<Self, PromoflowError> {
        if let Some(failure) = &self.failure {
            return Err(ActionExecutionError::new(&failure.stage, &failure.action, &failure.message).into());
        }
        if let Some(stop) = &self.stop {
            return Err(stop.reason.clone().into());
        }
        match self.status {
            ExecutionStatus::Failed | ExecutionStatus::Stopped => Err(PromoflowError::Internal(format!(
                "execution {} ended {} without a recorded cause",
                self.execution_id, self.status
            ))),
            _ => Ok(self),
        }
    }
}

/// Shared, live view of one execution.
///
/// The engine writes through the tracker; callers holding a clone can
/// snapshot it at any time.
#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    inner: Arc<RwLock<ExecutionReport>>,
}

impl ExecutionTracker {
    /// Creates a tracker with every stage and action pending.
    #[must_use]
    pub fn new(
        execution_id: Uuid,
        pipeline: impl Into<String>,
        stages: &[StageSpec],
        trigger: TriggerInputs,
        tags: BTreeMap<String, String>,
    ) -> Self {
        let stages = stages
            .iter()
            .map(|stage| StageRecord {
                name: stage.name.clone(),
                status: StageStatus::Pending,
                started_at: None,
                finished_at: None,
                actions: stage
                    .actions
                    .iter()
                    .map(|a| ActionRecord {
                        name: a.name.clone(),
                        run_order: a.run_order,
                        kind: a.kind,
                        status: ActionStatus::Pending,
                        started_at: None,
                        finished_at: None,
                        duration_ms: None,
                        error: None,
                        artifacts: Vec::new(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            inner: Arc::new(RwLock::new(ExecutionReport {
                execution_id,
                pipeline: pipeline.into(),
                status: ExecutionStatus::Pending,
                trigger,
                tags,
                started_at: None,
                finished_at: None,
                stages,
                artifacts: BTreeMap::new(),
                failure: None,
                stop: None,
            })),
        }
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> ExecutionReport {
        self.inner.read().clone()
    }

    /// Returns the overall status.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        self.inner.read().status
    }

    /// Returns a stage's status.
    #[must_use]
    pub fn stage_status(&self, name: &str) -> Option<StageStatus> {
        self.inner.read().stage_status(name)
    }

    pub(crate) fn start(&self) {
        let mut report = self.inner.write();
        report.status = ExecutionStatus::Running;
        report.started_at = Some(iso_timestamp());
    }

    pub(crate) fn stage_started(&self, index: usize) {
        let mut report = self.inner.write();
        if let Some(stage) = report.stages.get_mut(index) {
            stage.status = StageStatus::Running;
            stage.started_at = Some(iso_timestamp());
        }
    }

    pub(crate) fn action_started(&self, index: usize, action: &str) {
        self.with_action(index, action, |record| {
            record.status = ActionStatus::Running;
            record.started_at = Some(iso_timestamp());
        });
    }

    pub(crate) fn action_finished(
        &self,
        index: usize,
        action: &str,
        status: ActionStatus,
        error: Option<String>,
        artifacts: Vec<String>,
        duration_ms: f64,
    ) {
        self.with_action(index, action, |record| {
            record.status = status;
            record.finished_at = Some(iso_timestamp());
            record.duration_ms = Some(duration_ms);
            record.error = error;
            record.artifacts = artifacts;
        });
    }

    pub(crate) fn stage_finished(&self, index: usize, status: StageStatus) {
        let mut report = self.inner.write();
        if let Some(stage) = report.stages.get_mut(index) {
            stage.status = status;
            stage.finished_at = Some(iso_timestamp());
        }
    }

    pub(crate) fn record_artifacts(&self, artifacts: impl IntoIterator<Item = Artifact>) {
        let mut report = self.inner.write();
        for artifact in artifacts {
            report.artifacts.insert(artifact.name.clone(), artifact);
        }
    }

    pub(crate) fn fail(&self, failure: FailureInfo) {
        let mut report = self.inner.write();
        report.failure = Some(failure);
        report.status = ExecutionStatus::Failed;
        report.finished_at = Some(iso_timestamp());
    }

    pub(crate) fn stop(&self, stop: StopInfo) {
        let mut report = self.inner.write();
        report.stop = Some(stop);
        report.status = ExecutionStatus::Stopped;
        report.finished_at = Some(iso_timestamp());
    }

    pub(crate) fn succeed(&self) {
        let mut report = self.inner.write();
        report.status = ExecutionStatus::Succeeded;
        report.finished_at = Some(iso_timestamp());
    }

    fn with_action(&self, index: usize, action: &str, f: impl FnOnce(&mut ActionRecord)) {
        let mut report = self.inner.write();
        if let Some(record) = report
            .stages
            .get_mut(index)
            .and_then(|s| s.actions.iter_mut().find(|a| a.name == action))
        {
            f(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ActionSpec;
    use crate::testing::ScriptedAction;
    use pretty_assertions::assert_eq;

    fn tracker() -> ExecutionTracker {
        let stages = vec![
            StageSpec::new("DeployStaging")
                .with_action(ActionSpec::new("Deploy", Arc::new(ScriptedAction::succeeding("Deploy"))))
                .with_action(
                    ActionSpec::new("Validation", Arc::new(ScriptedAction::succeeding("Validation")))
                        .with_run_order(2)
                        .with_kind(ActionKind::Approval),
                ),
            StageSpec::new("DeployProd")
                .with_action(ActionSpec::new("Deploy", Arc::new(ScriptedAction::succeeding("Deploy")))),
        ];
        ExecutionTracker::new(
            Uuid::nil(),
            "promotion",
            &stages,
            TriggerInputs::manual("abc123", "master"),
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_tracker_starts_pending() {
        let report = tracker().snapshot();
        assert_eq!(report.status, ExecutionStatus::Pending);
        assert_eq!(report.stage_status("DeployStaging"), Some(StageStatus::Pending));
        assert_eq!(report.action("DeployStaging", "Validation").map(|a| a.kind), Some(ActionKind::Approval));
    }

    #[test]
    fn test_tracker_records_progress() {
        let tracker = tracker();
        tracker.start();
        tracker.stage_started(0);
        tracker.action_started(0, "Deploy");
        assert_eq!(tracker.stage_status("DeployStaging"), Some(StageStatus::Running));
        assert_eq!(
            tracker.snapshot().action("DeployStaging", "Deploy").map(|a| a.status),
            Some(ActionStatus::Running)
        );

        tracker.action_finished(0, "Deploy", ActionStatus::Succeeded, None, vec![], 1.5);
        let report = tracker.snapshot();
        let record = report.action("DeployStaging", "Deploy").unwrap();
        assert_eq!(record.status, ActionStatus::Succeeded);
        assert_eq!(record.duration_ms, Some(1.5));
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_stopped_report_into_result() {
        let tracker = tracker();
        let reason = ApprovalError::Rejected {
            gate: "Validation".to_string(),
            reviewer: "ops@example.com".to_string(),
            comment: None,
        };
        tracker.stop(StopInfo {
            stage: "DeployStaging".to_string(),
            action: "Validation".to_string(),
            reason: reason.clone(),
        });

        let report = tracker.snapshot();
        assert_eq!(report.status, ExecutionStatus::Stopped);
        match report.into_result() {
            Err(PromoflowError::Approval(err)) => assert_eq!(err, reason),
            other => panic!("expected approval error, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_report_names_stage_and_action() {
        let tracker = tracker();
        tracker.fail(FailureInfo {
            stage: "DeployProd".to_string(),
            action: "Deploy".to_string(),
            message: "stack rollback".to_string(),
        });

        let err = tracker.snapshot().into_result().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Action 'Deploy' in stage 'DeployProd' failed: stack rollback"
        );
    }
}
