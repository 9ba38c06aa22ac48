//! Integration tests for stage graph execution.

#[cfg(test)]
mod tests {
    use crate::core::{ActionKind, Artifact, ExecutionStatus, StageStatus};
    use crate::errors::{ApprovalError, PromoflowError};
    use crate::events::{names, CollectingEventSink};
    use crate::pipeline::{
        ActionSpec, PipelineBuilder, RunContext, StageSpec, TriggerInputs, TriggerPolicy,
    };
    use crate::testing::{ExecutionLog, ScriptedAction};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn run() -> RunContext {
        RunContext::new(TriggerInputs::automatic("abc123", "develop"))
    }

    fn spec(action: &Arc<ScriptedAction>, name: &str) -> ActionSpec {
        ActionSpec::new(name, Arc::clone(action) as Arc<dyn crate::pipeline::Action>)
    }

    #[tokio::test]
    async fn test_stages_run_in_order_and_wait_for_each_other() {
        let log = ExecutionLog::new();
        let slow = Arc::new(
            ScriptedAction::succeeding("Slow")
                .producing(["A"])
                .with_delay(Duration::from_millis(40))
                .with_log(&log),
        );
        let fast = Arc::new(ScriptedAction::succeeding("Fast").with_log(&log));
        let next = Arc::new(ScriptedAction::succeeding("Next").with_log(&log));

        let graph = PipelineBuilder::new("ordering")
            .stage(
                StageSpec::new("One")
                    .with_action(spec(&slow, "Slow").with_output("A"))
                    .with_action(spec(&fast, "Fast")),
            )
            .unwrap()
            .stage(StageSpec::new("Two").with_action(spec(&next, "Next").with_input("A")))
            .unwrap()
            .build()
            .unwrap();

        let report = graph.execute(run()).await.unwrap();

        assert_eq!(report.status, ExecutionStatus::Succeeded);
        let start_next = log.position("start:Next").unwrap();
        assert!(log.position("end:Slow").unwrap() < start_next);
        assert!(log.position("end:Fast").unwrap() < start_next);
        assert_eq!(next.seen_inputs(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_same_run_order_actions_run_concurrently() {
        let log = ExecutionLog::new();
        let a = Arc::new(
            ScriptedAction::succeeding("DockerBuild")
                .with_delay(Duration::from_millis(30))
                .with_log(&log),
        );
        let b = Arc::new(
            ScriptedAction::succeeding("Synth")
                .with_delay(Duration::from_millis(30))
                .with_log(&log),
        );

        let graph = PipelineBuilder::new("parallel")
            .stage(
                StageSpec::new("Build")
                    .with_action(spec(&a, "DockerBuild"))
                    .with_action(spec(&b, "Synth")),
            )
            .unwrap()
            .build()
            .unwrap();

        graph.execute(run()).await.unwrap();

        let entries = log.entries();
        assert!(entries[0].starts_with("start:"));
        assert!(entries[1].starts_with("start:"));
    }

    #[tokio::test]
    async fn test_run_order_serializes_deploy_then_gate() {
        let log = ExecutionLog::new();
        let deploy = Arc::new(
            ScriptedAction::succeeding("Deploy")
                .with_delay(Duration::from_millis(20))
                .with_log(&log),
        );
        let gate = Arc::new(ScriptedAction::succeeding("Validation").with_log(&log));

        let graph = PipelineBuilder::new("staging")
            .stage(
                StageSpec::new("DeployStaging")
                    .with_action(spec(&gate, "Validation").with_run_order(2).with_kind(ActionKind::Approval))
                    .with_action(spec(&deploy, "Deploy")),
            )
            .unwrap()
            .build()
            .unwrap();

        graph.execute(run()).await.unwrap();

        assert_eq!(
            log.entries(),
            vec!["start:Deploy", "end:Deploy", "start:Validation", "end:Validation"]
        );
    }

    #[tokio::test]
    async fn test_failed_stage_halts_pipeline() {
        let source = Arc::new(ScriptedAction::succeeding("Checkout").producing(["SourceOutput"]));
        let ok = Arc::new(ScriptedAction::succeeding("Synth"));
        let broken = Arc::new(ScriptedAction::failing("DockerBuild", "registry push denied"));
        let deploy = Arc::new(ScriptedAction::succeeding("Deploy"));

        let graph = PipelineBuilder::new("dev")
            .stage(StageSpec::new("Source").with_action(spec(&source, "Checkout").with_output("SourceOutput")))
            .unwrap()
            .stage(
                StageSpec::new("Build")
                    .with_action(spec(&broken, "DockerBuild").with_input("SourceOutput"))
                    .with_action(spec(&ok, "Synth").with_input("SourceOutput")),
            )
            .unwrap()
            .stage(StageSpec::new("Deploy").with_action(spec(&deploy, "Deploy")))
            .unwrap()
            .build()
            .unwrap();

        let report = graph.execute(run()).await.unwrap();

        assert_eq!(report.status, ExecutionStatus::Failed);
        assert_eq!(report.stage_status("Source"), Some(StageStatus::Succeeded));
        assert_eq!(report.stage_status("Build"), Some(StageStatus::Failed));
        assert_eq!(report.stage_status("Deploy"), Some(StageStatus::Pending));
        assert_eq!(report.action("Build", "Synth").map(|a| a.status), Some(StageStatus::Succeeded));
        assert_eq!(deploy.calls(), 0);

        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.stage, "Build");
        assert_eq!(failure.action, "DockerBuild");
        assert_eq!(failure.message, "registry push denied");
        assert!(report.artifact("SourceOutput").is_some());

        match report.into_result() {
            Err(PromoflowError::Action(err)) => assert_eq!(err.action, "DockerBuild"),
            other => panic!("expected action error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_skips_later_run_orders() {
        let deploy = Arc::new(ScriptedAction::failing("Deploy", "rollback"));
        let gate = Arc::new(ScriptedAction::succeeding("Validation"));

        let graph = PipelineBuilder::new("staging")
            .stage(
                StageSpec::new("DeployStaging")
                    .with_action(spec(&deploy, "Deploy"))
                    .with_action(spec(&gate, "Validation").with_run_order(2)),
            )
            .unwrap()
            .build()
            .unwrap();

        let report = graph.execute(run()).await.unwrap();

        assert_eq!(gate.calls(), 0);
        assert_eq!(
            report.action("DeployStaging", "Validation").map(|a| a.status),
            Some(StageStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_stopped_gate_halts_with_reason() {
        let reason = ApprovalError::Expired {
            gate: "Validation".to_string(),
            timeout_ms: 1000,
        };
        let gate = Arc::new(ScriptedAction::stopping("Validation", reason.clone()));
        let prod = Arc::new(ScriptedAction::succeeding("Deploy"));

        let graph = PipelineBuilder::new("promotion")
            .stage(StageSpec::new("DeployStaging").with_action(spec(&gate, "Validation")))
            .unwrap()
            .stage(StageSpec::new("DeployProd").with_action(spec(&prod, "Deploy")))
            .unwrap()
            .build()
            .unwrap();

        let report = graph.execute(run()).await.unwrap();

        assert_eq!(report.status, ExecutionStatus::Stopped);
        assert_eq!(report.stage_status("DeployStaging"), Some(StageStatus::Stopped));
        assert_eq!(report.stage_status("DeployProd"), Some(StageStatus::Pending));
        assert_eq!(report.stop.as_ref().map(|s| &s.reason), Some(&reason));
        assert!(report.failure.is_none());
        assert_eq!(prod.calls(), 0);
    }

    #[tokio::test]
    async fn test_artifacts_are_copied_to_consumers() {
        let producer = Arc::new(
            ScriptedAction::succeeding("DockerBuild")
                .with_artifact(Artifact::new("ImageBuildOutput").with_json("imageTag.json", json!({"imageTag": "abc123"}))),
        );
        let consumer = Arc::new(ScriptedAction::succeeding("Deploy"));

        let graph = PipelineBuilder::new("dev")
            .stage(StageSpec::new("Build").with_action(spec(&producer, "DockerBuild").with_output("ImageBuildOutput")))
            .unwrap()
            .stage(StageSpec::new("Deploy").with_action(spec(&consumer, "Deploy").with_input("ImageBuildOutput")))
            .unwrap()
            .build()
            .unwrap();

        let report = graph.execute(run()).await.unwrap();
        let artifact = report.artifact("ImageBuildOutput").unwrap();

        assert_eq!(artifact.producer, "Build/DockerBuild");
        assert_eq!(artifact.json_field("imageTag.json", "imageTag").unwrap(), "abc123");
        assert_eq!(consumer.seen_inputs(), vec!["ImageBuildOutput"]);
        assert_eq!(
            report.action("Build", "DockerBuild").map(|a| a.artifacts.clone()),
            Some(vec!["ImageBuildOutput".to_string()])
        );
    }

    #[tokio::test]
    async fn test_manual_only_pipeline_refuses_automatic_trigger() {
        let source = Arc::new(ScriptedAction::succeeding("Checkout"));
        let graph = PipelineBuilder::new("promotion")
            .with_trigger_policy(TriggerPolicy::ManualOnly)
            .stage(StageSpec::new("Source").with_action(spec(&source, "Checkout")))
            .unwrap()
            .build()
            .unwrap();

        let err = graph.execute(run()).await.unwrap_err();
        assert!(matches!(err, PromoflowError::TriggerRefused { .. }));
        assert_eq!(source.calls(), 0);

        let manual = RunContext::new(TriggerInputs::manual("abc123", "master"));
        assert!(graph.execute(manual).await.unwrap().succeeded());
    }

    #[tokio::test]
    async fn test_panicking_action_fails_its_stage() {
        let boom = Arc::new(ScriptedAction::panicking("Boom"));
        let graph = PipelineBuilder::new("p")
            .stage(StageSpec::new("Build").with_action(spec(&boom, "Boom")))
            .unwrap()
            .build()
            .unwrap();

        let report = graph.execute(run()).await.unwrap();

        assert_eq!(report.status, ExecutionStatus::Failed);
        assert!(report.failure.unwrap().message.contains("aborted"));
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_emitted() {
        let sink = Arc::new(CollectingEventSink::new());
        let action = Arc::new(ScriptedAction::succeeding("Checkout"));
        let graph = PipelineBuilder::new("p")
            .stage(StageSpec::new("Source").with_action(spec(&action, "Checkout")))
            .unwrap()
            .build()
            .unwrap();

        graph.execute(run().with_event_sink(sink.clone())).await.unwrap();

        assert_eq!(
            sink.event_types(),
            vec![
                names::PIPELINE_STARTED,
                names::STAGE_STARTED,
                names::ACTION_STARTED,
                names::ACTION_SUCCEEDED,
                names::STAGE_SUCCEEDED,
                names::PIPELINE_COMPLETED,
            ]
        );
    }

    #[tokio::test]
    async fn test_spawned_run_is_queryable_while_in_flight() {
        let slow = Arc::new(ScriptedAction::succeeding("Deploy").with_delay(Duration::from_millis(100)));
        let graph = Arc::new(
            PipelineBuilder::new("dev")
                .stage(StageSpec::new("Deploy").with_action(spec(&slow, "Deploy")))
                .unwrap()
                .build()
                .unwrap(),
        );

        let handle = graph.spawn(run());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.status, ExecutionStatus::Running);
        assert_eq!(snapshot.stage_status("Deploy"), Some(StageStatus::Running));

        let execution_id = handle.execution_id();
        let report = handle.wait().await.unwrap();
        assert_eq!(report.execution_id, execution_id);
        assert_eq!(report.status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_graph_can_run_twice_with_fresh_state() {
        let action = Arc::new(ScriptedAction::succeeding("Checkout").producing(["SourceOutput"]));
        let graph = PipelineBuilder::new("p")
            .stage(StageSpec::new("Source").with_action(spec(&action, "Checkout").with_output("SourceOutput")))
            .unwrap()
            .build()
            .unwrap();

        let first = graph.execute(run()).await.unwrap();
        let second = graph.execute(run()).await.unwrap();

        assert_ne!(first.execution_id, second.execution_id);
        assert_eq!(action.calls(), 2);
    }
}
