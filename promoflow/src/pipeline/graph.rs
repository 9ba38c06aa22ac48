//! Stage graph execution engine.
//!
//! Stages run strictly in order. Inside a stage, actions are grouped by run
//! order; each group runs concurrently on spawned tasks and the next group
//! starts only once every action in the current one is terminal. The first
//! stage that does not succeed halts the run and later stages stay pending.

use super::action::{ActionContext, ActionInputs, TriggerInputs, TriggerPolicy};
use super::spec::{ActionSpec, StageSpec};
use super::tracker::{ExecutionReport, ExecutionTracker, FailureInfo, StopInfo};
use crate::bridge::BridgeGrant;
use crate::core::{ActionOutput, Artifact, StageStatus};
use crate::errors::{ApprovalError, PromoflowError};
use crate::events::{default_sink, names, EventSink};
use crate::observability::SpanTimer;
use crate::utils::generate_uuid_v7;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-run inputs: identity, trigger, and where events go.
#[derive(Clone)]
pub struct RunContext {
    execution_id: Uuid,
    trigger: TriggerInputs,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("execution_id", &self.execution_id)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Creates a run context with a fresh execution id and no event sink.
    #[must_use]
    pub fn new(trigger: TriggerInputs) -> Self {
        Self {
            execution_id: generate_uuid_v7(),
            trigger,
            events: default_sink(),
        }
    }

    /// Sets the execution id.
    #[must_use]
    pub fn with_execution_id(mut self, execution_id: Uuid) -> Self {
        self.execution_id = execution_id;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the execution id.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Returns the trigger inputs.
    #[must_use]
    pub fn trigger(&self) -> &TriggerInputs {
        &self.trigger
    }
}

/// Handle to a run executing in the background.
#[derive(Debug)]
pub struct ExecutionHandle {
    execution_id: Uuid,
    tracker: ExecutionTracker,
    task: JoinHandle<Result<ExecutionReport, PromoflowError>>,
}

impl ExecutionHandle {
    /// Returns the execution id.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Returns the live tracker.
    #[must_use]
    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    /// Returns the current state of the run.
    #[must_use]
    pub fn snapshot(&self) -> ExecutionReport {
        self.tracker.snapshot()
    }

    /// Waits for the run to finish.
    ///
    /// # Errors
    ///
    /// Returns the run's error, or `Internal` if the run task itself died.
    pub async fn wait(self) -> Result<ExecutionReport, PromoflowError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PromoflowError::Internal(format!("execution task failed: {e}"))),
        }
    }
}

/// A validated, immutable pipeline ready to execute.
///
/// Built by [`super::PipelineBuilder`]; a graph can be executed any number
/// of times, each run with its own tracker and artifacts.
#[derive(Debug)]
pub struct StageGraph {
    name: String,
    stages: Vec<StageSpec>,
    trigger_policy: TriggerPolicy,
    tags: BTreeMap<String, String>,
    grants: Vec<BridgeGrant>,
}

impl StageGraph {
    pub(crate) fn new(
        name: String,
        stages: Vec<StageSpec>,
        trigger_policy: TriggerPolicy,
        tags: BTreeMap<String, String>,
        grants: Vec<BridgeGrant>,
    ) -> Self {
        Self {
            name,
            stages,
            trigger_policy,
            tags,
            grants,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns the trigger policy.
    #[must_use]
    pub fn trigger_policy(&self) -> TriggerPolicy {
        self.trigger_policy
    }

    /// Returns the pipeline tags.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Returns the bridge grants declared for the pipeline's actions.
    #[must_use]
    pub fn grants(&self) -> &[BridgeGrant] {
        &self.grants
    }

    /// Executes the graph to completion.
    ///
    /// A failed or stopped run is still `Ok`: the report names the failing
    /// stage and action. Use [`ExecutionReport::into_result`] to turn it into
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns `TriggerRefused` if the trigger mode is not accepted; no stage
    /// runs in that case.
    pub async fn execute(&self, run: RunContext) -> Result<ExecutionReport, PromoflowError> {
        let tracker = self.tracker_for(&run);
        self.run(run, tracker).await
    }

    /// Starts the graph on a background task and returns a handle whose
    /// tracker can be queried while the run is in flight.
    #[must_use]
    pub fn spawn(self: &Arc<Self>, run: RunContext) -> ExecutionHandle {
        let tracker = self.tracker_for(&run);
        let execution_id = run.execution_id;
        let graph = Arc::clone(self);
        let task_tracker = tracker.clone();
        let task = tokio::spawn(async move { graph.run(run, task_tracker).await });

        ExecutionHandle {
            execution_id,
            tracker,
            task,
        }
    }

    fn tracker_for(&self, run: &RunContext) -> ExecutionTracker {
        ExecutionTracker::new(
            run.execution_id,
            &self.name,
            &self.stages,
            run.trigger.clone(),
            self.tags.clone(),
        )
    }

    async fn run(&self, run: RunContext, tracker: ExecutionTracker) -> Result<ExecutionReport, PromoflowError> {
        if !self.trigger_policy.admits(run.trigger.mode) {
            warn!(
                pipeline = %self.name,
                mode = %run.trigger.mode,
                "Trigger refused"
            );
            return Err(PromoflowError::TriggerRefused {
                pipeline: self.name.clone(),
                reason: format!("{} triggers are not accepted", run.trigger.mode),
            });
        }

        let timer = SpanTimer::start(format!("pipeline:{}", self.name));
        tracker.start();
        info!(
            pipeline = %self.name,
            execution_id = %run.execution_id,
            revision = %run.trigger.revision,
            "Pipeline started"
        );
        run.events
            .emit(
                names::PIPELINE_STARTED,
                Some(json!({
                    "execution_id": run.execution_id.to_string(),
                    "pipeline": self.name,
                    "revision": run.trigger.revision,
                    "branch": run.trigger.branch,
                    "mode": run.trigger.mode,
                })),
            )
            .await;

        let mut committed: BTreeMap<String, Artifact> = BTreeMap::new();

        for (index, stage) in self.stages.iter().enumerate() {
            let outcome = self.run_stage(&run, &tracker, index, stage, &committed).await;
            let status = outcome.status();
            tracker.record_artifacts(outcome.artifacts.values().cloned());
            committed.extend(outcome.artifacts);

            tracker.stage_finished(index, status);
            let stage_event = match status {
                StageStatus::Failed => names::STAGE_FAILED,
                StageStatus::Stopped => names::STAGE_STOPPED,
                _ => names::STAGE_SUCCEEDED,
            };
            run.events
                .emit(stage_event, Some(self.payload(&run, &stage.name, None)))
                .await;

            if let Some(failure) = outcome.failure {
                error!(
                    pipeline = %self.name,
                    execution_id = %run.execution_id,
                    stage = %failure.stage,
                    action = %failure.action,
                    error = %failure.message,
                    "Stage failed, halting pipeline"
                );
                tracker.fail(failure);
                return Ok(self.complete(&run, &tracker, timer).await);
            }
            if let Some(stop) = outcome.stop {
                warn!(
                    pipeline = %self.name,
                    execution_id = %run.execution_id,
                    stage = %stop.stage,
                    action = %stop.action,
                    reason = %stop.reason,
                    "Stage stopped, halting pipeline"
                );
                tracker.stop(stop);
                return Ok(self.complete(&run, &tracker, timer).await);
            }
            info!(pipeline = %self.name, stage = %stage.name, "Stage succeeded");
        }

        tracker.succeed();
        Ok(self.complete(&run, &tracker, timer).await)
    }

    async fn complete(&self, run: &RunContext, tracker: &ExecutionTracker, timer: SpanTimer) -> ExecutionReport {
        let duration_ms = timer.finish();
        let report = tracker.snapshot();
        info!(
            pipeline = %self.name,
            execution_id = %run.execution_id,
            status = %report.status,
            duration_ms,
            "Pipeline completed"
        );
        run.events
            .emit(
                names::PIPELINE_COMPLETED,
                Some(json!({
                    "execution_id": run.execution_id.to_string(),
                    "pipeline": self.name,
                    "status": report.status,
                    "duration_ms": duration_ms,
                })),
            )
            .await;
        report
    }

    async fn run_stage(
        &self,
        run: &RunContext,
        tracker: &ExecutionTracker,
        index: usize,
        stage: &StageSpec,
        committed: &BTreeMap<String, Artifact>,
    ) -> StageOutcome {
        tracker.stage_started(index);
        info!(pipeline = %self.name, stage = %stage.name, "Stage started");
        run.events
            .emit(names::STAGE_STARTED, Some(self.payload(run, &stage.name, None)))
            .await;

        let mut outcome = StageOutcome::default();

        for (run_order, group) in stage.run_order_groups() {
            if outcome.halted() {
                debug!(stage = %stage.name, run_order, "Skipping run order after halt");
                break;
            }

            let mut in_flight = FuturesUnordered::new();
            for spec in group {
                let inputs = select_inputs(spec, committed, &outcome.artifacts);
                let ctx = ActionContext::new(
                    run.execution_id,
                    &self.name,
                    &stage.name,
                    &spec.name,
                    spec.run_order,
                    run.trigger.clone(),
                    inputs,
                    Arc::clone(&run.events),
                );

                tracker.action_started(index, &spec.name);
                debug!(stage = %stage.name, action = %spec.name, run_order, "Action started");
                run.events
                    .emit(names::ACTION_STARTED, Some(self.payload(run, &stage.name, Some(&spec.name))))
                    .await;

                let runner = Arc::clone(&spec.runner);
                let span = spec.path(&stage.name);
                let handle = tokio::spawn(async move {
                    let timer = SpanTimer::start(span);
                    let output = runner.execute(&ctx).await;
                    (output, timer.finish())
                });
                let name = spec.name.clone();
                in_flight.push(async move { (name, handle.await) });
            }

            while let Some((name, joined)) = in_flight.next().await {
                let Some(spec) = stage.action(&name) else {
                    continue;
                };
                let (output, duration_ms) = match joined {
                    Ok(result) => result,
                    Err(e) => (ActionOutput::failed(format!("action task aborted: {e}")), 0.0),
                };
                let output = settle(spec, &stage.name, output);
                let produced: Vec<String> = output.artifacts.iter().map(|a| a.name.clone()).collect();
                tracker.action_finished(index, &name, output.status, output.error.clone(), produced, duration_ms);

                match output.status {
                    StageStatus::Succeeded => {
                        debug!(stage = %stage.name, action = %name, duration_ms, "Action succeeded");
                        run.events
                            .emit(names::ACTION_SUCCEEDED, Some(self.payload(run, &stage.name, Some(&name))))
                            .await;
                        for artifact in output.artifacts {
                            outcome.artifacts.insert(artifact.name.clone(), artifact);
                        }
                    }
                    StageStatus::Stopped => {
                        let reason = output.stop_reason.unwrap_or_else(|| ApprovalError::Cancelled {
                            gate: name.clone(),
                        });
                        warn!(stage = %stage.name, action = %name, reason = %reason, "Action stopped");
                        let mut data = self.payload(run, &stage.name, Some(&name));
                        data["reason"] = serde_json::to_value(&reason).unwrap_or(Value::Null);
                        run.events.emit(names::ACTION_STOPPED, Some(data)).await;
                        outcome.stop.get_or_insert(StopInfo {
                            stage: stage.name.clone(),
                            action: name,
                            reason,
                        });
                    }
                    _ => {
                        let message = output.error.unwrap_or_else(|| "action failed".to_string());
                        warn!(stage = %stage.name, action = %name, error = %message, "Action failed");
                        let mut data = self.payload(run, &stage.name, Some(&name));
                        data["error"] = Value::String(message.clone());
                        run.events.emit(names::ACTION_FAILED, Some(data)).await;
                        outcome.failure.get_or_insert(FailureInfo {
                            stage: stage.name.clone(),
                            action: name,
                            message,
                        });
                    }
                }
            }
        }

        outcome
    }

    fn payload(&self, run: &RunContext, stage: &str, action: Option<&str>) -> Value {
        let mut data = json!({
            "execution_id": run.execution_id.to_string(),
            "pipeline": self.name,
            "stage": stage,
        });
        if let Some(action) = action {
            data["action"] = Value::String(action.to_string());
        }
        data
    }
}

/// What a stage left behind.
#[derive(Debug, Default)]
struct StageOutcome {
    artifacts: BTreeMap<String, Artifact>,
    failure: Option<FailureInfo>,
    stop: Option<StopInfo>,
}

impl StageOutcome {
    fn halted(&self) -> bool {
        self.failure.is_some() || self.stop.is_some()
    }

    /// Failure takes precedence over a stop.
    fn status(&self) -> StageStatus {
        if self.failure.is_some() {
            StageStatus::Failed
        } else if self.stop.is_some() {
            StageStatus::Stopped
        } else {
            StageStatus::Succeeded
        }
    }
}

/// Copies the declared inputs visible to `spec`: artifacts committed by
/// earlier stages plus those produced by earlier run orders of this stage.
fn select_inputs(
    spec: &ActionSpec,
    committed: &BTreeMap<String, Artifact>,
    stage_local: &BTreeMap<String, Artifact>,
) -> ActionInputs {
    let declared: BTreeSet<String> = spec.inputs.iter().cloned().collect();
    let artifacts = declared
        .iter()
        .filter_map(|name| {
            stage_local
                .get(name)
                .or_else(|| committed.get(name))
                .map(|a| (name.clone(), a.clone()))
        })
        .collect();
    ActionInputs::new(artifacts, declared, &spec.name)
}

/// Checks an action's output against its declaration.
///
/// A succeeded action must produce exactly its declared artifacts; anything
/// else turns into a failure. Produced artifacts are stamped with the
/// producing action's path.
fn settle(spec: &ActionSpec, stage: &str, mut output: ActionOutput) -> ActionOutput {
    match output.status {
        StageStatus::Succeeded => {
            let declared: BTreeSet<&str> = spec.outputs.iter().map(String::as_str).collect();
            let mut produced = BTreeSet::new();
            for artifact in &output.artifacts {
                if !declared.contains(artifact.name.as_str()) {
                    return ActionOutput::failed(format!(
                        "produced undeclared artifact '{}'",
                        artifact.name
                    ));
                }
                if !produced.insert(artifact.name.as_str()) {
                    return ActionOutput::failed(format!("produced artifact '{}' twice", artifact.name));
                }
            }
            if let Some(missing) = declared.difference(&produced).next() {
                return ActionOutput::failed(format!("did not produce declared artifact '{missing}'"));
            }

            let path = spec.path(stage);
            for artifact in &mut output.artifacts {
                artifact.producer.clone_from(&path);
            }
            output
        }
        StageStatus::Failed | StageStatus::Stopped => {
            output.artifacts.clear();
            output
        }
        StageStatus::Pending | StageStatus::Running => {
            ActionOutput::failed(format!("returned non-terminal status '{}'", output.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAction;

    fn spec(outputs: &[&str]) -> ActionSpec {
        ActionSpec::new("DockerBuild", Arc::new(ScriptedAction::succeeding("DockerBuild")))
            .with_outputs(outputs.iter().copied())
    }

    #[test]
    fn test_settle_stamps_producer() {
        let output = settle(
            &spec(&["ImageBuildOutput"]),
            "Build",
            ActionOutput::succeeded(vec![Artifact::new("ImageBuildOutput")]),
        );
        assert!(output.is_success());
        assert_eq!(output.artifacts[0].producer, "Build/DockerBuild");
    }

    #[test]
    fn test_settle_rejects_missing_and_undeclared_outputs() {
        let missing = settle(&spec(&["ImageBuildOutput"]), "Build", ActionOutput::succeeded_empty());
        assert_eq!(missing.status, StageStatus::Failed);
        assert!(missing.error.unwrap().contains("ImageBuildOutput"));

        let extra = settle(
            &spec(&[]),
            "Build",
            ActionOutput::succeeded(vec![Artifact::new("Sneaky")]),
        );
        assert_eq!(extra.status, StageStatus::Failed);
        assert!(extra.error.unwrap().contains("undeclared"));
    }

    #[test]
    fn test_settle_rejects_non_terminal_status() {
        let mut output = ActionOutput::succeeded_empty();
        output.status = StageStatus::Running;
        let settled = settle(&spec(&[]), "Build", output);
        assert_eq!(settled.status, StageStatus::Failed);
    }

    #[test]
    fn test_select_inputs_prefers_declared_only() {
        let committed = BTreeMap::from([
            ("SourceOutput".to_string(), Artifact::new("SourceOutput")),
            ("Other".to_string(), Artifact::new("Other")),
        ]);
        let spec = ActionSpec::new("Synth", Arc::new(ScriptedAction::succeeding("Synth")))
            .with_input("SourceOutput");
        let inputs = select_inputs(&spec, &committed, &BTreeMap::new());

        assert!(inputs.contains("SourceOutput"));
        assert!(inputs.get("Other").is_err());
    }

    #[test]
    fn test_run_context_defaults() {
        let run = RunContext::new(TriggerInputs::automatic("abc123", "develop"));
        assert_eq!(run.trigger().revision, "abc123");
        let fixed = run.with_execution_id(Uuid::nil());
        assert_eq!(fixed.execution_id(), Uuid::nil());
    }
}
