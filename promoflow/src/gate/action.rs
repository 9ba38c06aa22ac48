//! The approval gate as a pipeline action.

use super::service::{ApprovalRequest, ApprovalService};
use crate::core::ActionOutput;
use crate::pipeline::{Action, ActionContext};
use crate::utils::iso_timestamp;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Blocks its stage until a reviewer decides or the timeout elapses.
///
/// Approval succeeds the action. Rejection or expiry stops it, which halts
/// the pipeline in `Stopped`; there is no resume, the run must be
/// re-triggered from the top.
#[derive(Debug, Clone)]
pub struct ApprovalGateAction {
    name: String,
    service: Arc<ApprovalService>,
    reviewers: Vec<String>,
    timeout: Option<Duration>,
}

impl ApprovalGateAction {
    /// Creates a gate served by `service`.
    #[must_use]
    pub fn new(name: impl Into<String>, service: Arc<ApprovalService>) -> Self {
        Self {
            name: name.into(),
            service,
            reviewers: Vec::new(),
            timeout: None,
        }
    }

    /// Sets the reviewer addresses.
    #[must_use]
    pub fn with_reviewers(mut self, reviewers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.reviewers = reviewers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the decision timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the reviewer addresses.
    #[must_use]
    pub fn reviewers(&self) -> &[String] {
        &self.reviewers
    }

    /// Returns the decision timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl Action for ApprovalGateAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ActionContext) -> ActionOutput {
        let request = ApprovalRequest {
            execution_id: ctx.execution_id(),
            pipeline: ctx.pipeline().to_string(),
            stage: ctx.stage().to_string(),
            gate: ctx.action().to_string(),
            revision: ctx.trigger().revision.clone(),
            reviewers: self.reviewers.clone(),
            requested_at: iso_timestamp(),
            timeout: self.timeout,
        };

        match self.service.request(request, ctx.events()).await {
            Ok(_) => ActionOutput::succeeded_empty(),
            Err(reason) => ActionOutput::stopped(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActionKind, ExecutionStatus, StageStatus};
    use crate::errors::ApprovalError;
    use crate::gate::{Decision, GateState};
    use crate::pipeline::{ActionSpec, PipelineBuilder, RunContext, StageGraph, StageSpec, TriggerInputs};
    use crate::testing::ScriptedAction;

    fn graph(gate: ApprovalGateAction, prod: Arc<ScriptedAction>) -> Arc<StageGraph> {
        Arc::new(
            PipelineBuilder::new("promotion")
                .stage(
                    StageSpec::new("DeployStaging").with_action(
                        ActionSpec::new("Validation", Arc::new(gate)).with_kind(ActionKind::Approval),
                    ),
                )
                .unwrap()
                .stage(StageSpec::new("DeployProd").with_action(ActionSpec::new("Deploy", prod)))
                .unwrap()
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_approved_gate_schedules_next_stage() {
        let service = Arc::new(ApprovalService::default());
        let prod = Arc::new(ScriptedAction::succeeding("Deploy"));
        let gate = ApprovalGateAction::new("Validation", Arc::clone(&service)).with_reviewers(["ops@example.com"]);

        let handle = graph(gate, Arc::clone(&prod)).spawn(RunContext::new(TriggerInputs::manual("abc123", "master")));
        let pending = service.next_pending().await;
        assert_eq!(pending.execution_id, handle.execution_id());
        assert_eq!(pending.reviewers, vec!["ops@example.com"]);
        assert_eq!(handle.snapshot().stage_status("DeployStaging"), Some(StageStatus::Running));

        service
            .decide(pending.execution_id, &pending.gate, Decision::approve("ops@example.com"))
            .unwrap();
        let report = handle.wait().await.unwrap();

        assert_eq!(report.status, ExecutionStatus::Succeeded);
        assert_eq!(prod.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_gate_stops_pipeline() {
        let service = Arc::new(ApprovalService::default());
        let prod = Arc::new(ScriptedAction::succeeding("Deploy"));
        let gate = ApprovalGateAction::new("Validation", Arc::clone(&service)).with_timeout(Duration::from_secs(60));

        let report = graph(gate, Arc::clone(&prod))
            .execute(RunContext::new(TriggerInputs::manual("abc123", "master")))
            .await
            .unwrap();

        assert_eq!(report.status, ExecutionStatus::Stopped);
        assert_eq!(
            report.stop.map(|s| s.reason),
            Some(ApprovalError::Expired {
                gate: "Validation".to_string(),
                timeout_ms: 60_000,
            })
        );
        assert_eq!(prod.calls(), 0);
        assert_eq!(service.state(report.execution_id, "Validation"), Some(GateState::Expired));
    }
}
