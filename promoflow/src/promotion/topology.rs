//! Composing the release's stage graphs from one configuration.

use super::actions::{
    BridgeBinding, DeployAction, ImageBuildAction, SourceAction, SynthesizeAction, TagLookup,
};
use super::artifacts;
use super::collaborators::Collaborators;
use super::config::{ReleaseConfig, StackConfig};
use super::{files, IMAGE_TAG_FIELD};
use crate::bridge::{BridgeGrant, ScopedBridge};
use crate::core::ActionKind;
use crate::description::{Blueprint, ValueSource};
use crate::errors::PromoflowError;
use crate::events::{default_sink, EventSink};
use crate::gate::{ApprovalGateAction, ApprovalService};
use crate::pipeline::{ActionSpec, PipelineBuilder, StageGraph, StageSpec};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Name of the dev build pipeline.
pub const BUILD_PIPELINE: &str = "dev-pipeline";
/// Name of the staging/production promotion pipeline.
pub const PROMOTION_PIPELINE: &str = "staging-prod-pipeline";
/// Name of the single-graph release pipeline.
pub const RELEASE_PIPELINE: &str = "release";

/// Name of the approval action in the staging stage.
pub const APPROVAL_ACTION: &str = "Validation";

/// Builds the release's pipelines from a validated configuration.
///
/// Every constructor synthesizes its descriptions once before returning,
/// so description errors surface before any execution starts.
#[derive(Clone)]
pub struct ReleaseTopology {
    config: ReleaseConfig,
    collaborators: Collaborators,
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for ReleaseTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseTopology")
            .field("config", &self.config)
            .field("collaborators", &self.collaborators)
            .finish_non_exhaustive()
    }
}

impl ReleaseTopology {
    /// Creates a topology.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration is invalid.
    pub fn new(config: ReleaseConfig, collaborators: Collaborators) -> Result<Self, PromoflowError> {
        config.validate()?;
        Ok(Self {
            config,
            collaborators,
            events: default_sink(),
        })
    }

    /// Sets the sink bridge clients report writes to.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    /// Returns the approval service the gates block on.
    #[must_use]
    pub fn approvals(&self) -> &Arc<ApprovalService> {
        &self.collaborators.approvals
    }

    fn blueprint(&self, stacks: &[&StackConfig]) -> Blueprint {
        stacks.iter().fold(
            Blueprint::new(self.config.repositories.clone())
                .with_format(self.config.description_format),
            |blueprint, stack| blueprint.with_stack(stack.to_stack(&self.config.containers)),
        )
    }

    fn bridge_client(&self, principal: &str, grants: Vec<BridgeGrant>) -> ScopedBridge {
        ScopedBridge::new(self.collaborators.bridge.clone(), principal, grants)
            .with_event_sink(self.events.clone())
    }

    fn synth_action(
        blueprint: Blueprint,
        output: &str,
        tag_source: ValueSource,
    ) -> Result<SynthesizeAction, PromoflowError> {
        let preflight = blueprint.synthesize(&tag_source)?;
        debug!(
            output = %output,
            descriptions = preflight.descriptions.len(),
            "Descriptions validated"
        );
        Ok(SynthesizeAction::new("Synth", blueprint, output, tag_source))
    }

    fn deploy_action(&self, stack: &StackConfig, descriptions: &str) -> DeployAction {
        DeployAction::new(
            "Deploy",
            self.collaborators.provisioner.clone(),
            &stack.name,
            &stack.environment,
            self.config.description_format,
            descriptions,
        )
    }

    fn approval_gate(&self) -> ApprovalGateAction {
        let gate = ApprovalGateAction::new(APPROVAL_ACTION, self.collaborators.approvals.clone())
            .with_reviewers(self.config.reviewers.clone());
        match self.config.approval_timeout() {
            Some(timeout) => gate.with_timeout(timeout),
            None => gate,
        }
    }

    fn source_stage(&self, branch: &str, output: &str) -> StageSpec {
        let checkout = SourceAction::new(
            "Checkout",
            self.collaborators.source.clone(),
            self.config.source_slug(),
            branch,
            output,
        );
        StageSpec::new("Source").with_action(
            ActionSpec::new("Checkout", Arc::new(checkout))
                .with_output(output)
                .with_kind(ActionKind::Source),
        )
    }

    /// Stages shared by the build and release pipelines: Source, Build and
    /// the dev deploy.
    fn build_stages(&self, deploy_stage: &str) -> Result<Vec<StageSpec>, PromoflowError> {
        let mut image_build = ImageBuildAction::new(
            "ImageBuild",
            self.collaborators.images.clone(),
            self.config.repositories.clone(),
            artifacts::SOURCE,
            artifacts::IMAGE_BUILD,
        );
        if self.config.publish_tag {
            let client =
                self.bridge_client(BUILD_PIPELINE, vec![BridgeGrant::write(&self.config.bridge_prefix)?]);
            image_build = image_build.with_publish(BridgeBinding::new(client, &self.config.bridge_key));
        }

        let synth = Self::synth_action(
            self.blueprint(&[&self.config.dev_stack]),
            artifacts::DEV_DESCRIPTIONS,
            ValueSource::artifact_field(artifacts::IMAGE_BUILD, files::IMAGE_TAG, IMAGE_TAG_FIELD),
        )?;

        let build = StageSpec::new("Build")
            .with_action(
                ActionSpec::new("ImageBuild", Arc::new(image_build))
                    .with_input(artifacts::SOURCE)
                    .with_output(artifacts::IMAGE_BUILD)
                    .with_kind(ActionKind::Build),
            )
            .with_action(
                ActionSpec::new("Synth", Arc::new(synth))
                    .with_input(artifacts::SOURCE)
                    .with_output(artifacts::DEV_DESCRIPTIONS)
                    .with_kind(ActionKind::Build),
            );

        let deploy = StageSpec::new(deploy_stage).with_action(
            ActionSpec::new(
                "Deploy",
                Arc::new(self.deploy_action(&self.config.dev_stack, artifacts::DEV_DESCRIPTIONS)),
            )
            .with_inputs([artifacts::DEV_DESCRIPTIONS, artifacts::IMAGE_BUILD])
            .with_kind(ActionKind::Deploy),
        );

        Ok(vec![
            self.source_stage(&self.config.dev_branch, artifacts::SOURCE),
            build,
            deploy,
        ])
    }

    /// Stages shared by the promotion and release pipelines: the promotion
    /// build, staging deploy with its gate, and production deploy.
    ///
    /// The synthesis runs after `after`. With `handoff`, the tag is read from
    /// that artifact; otherwise `bridge` is the fallback read client.
    fn promotion_stages(
        &self,
        build_stage: &str,
        after: &str,
        handoff: bool,
        bridge: Option<ScopedBridge>,
    ) -> Result<Vec<StageSpec>, PromoflowError> {
        let mut lookup = TagLookup::new();
        if handoff {
            lookup = lookup.with_handoff(after);
        }
        if let Some(client) = bridge {
            lookup = lookup.with_bridge(BridgeBinding::new(client, &self.config.bridge_key));
        }

        let synth = Self::synth_action(
            self.blueprint(&[&self.config.staging_stack, &self.config.prod_stack]),
            artifacts::PROMOTION_BUILD,
            ValueSource::artifact_field(artifacts::PROMOTION_BUILD, files::IMAGE_TAG, IMAGE_TAG_FIELD),
        )?
        .with_tag_lookup(lookup);

        let synth_spec = ActionSpec::new("Synth", Arc::new(synth))
            .with_input(after)
            .with_output(artifacts::PROMOTION_BUILD)
            .with_kind(ActionKind::Build);

        let staging = StageSpec::new("DeployStaging")
            .with_action(
                ActionSpec::new(
                    "Deploy",
                    Arc::new(self.deploy_action(&self.config.staging_stack, artifacts::PROMOTION_BUILD)),
                )
                .with_input(artifacts::PROMOTION_BUILD)
                .with_kind(ActionKind::Deploy),
            )
            .with_action(
                ActionSpec::new(APPROVAL_ACTION, Arc::new(self.approval_gate()))
                    .with_run_order(2)
                    .with_kind(ActionKind::Approval),
            );

        let prod = StageSpec::new("DeployProd").with_action(
            ActionSpec::new(
                "Deploy",
                Arc::new(self.deploy_action(&self.config.prod_stack, artifacts::PROMOTION_BUILD)),
            )
            .with_input(artifacts::PROMOTION_BUILD)
            .with_kind(ActionKind::Deploy),
        );

        Ok(vec![StageSpec::new(build_stage).with_action(synth_spec), staging, prod])
    }

    fn assemble(mut builder: PipelineBuilder, stages: Vec<StageSpec>) -> Result<StageGraph, PromoflowError> {
        for stage in stages {
            builder.add_stage(stage)?;
        }
        Ok(builder.build()?)
    }

    /// Builds the dev pipeline: Source, Build (image build and synthesis in
    /// parallel), Deploy.
    ///
    /// # Errors
    ///
    /// Returns an error if descriptions fail to synthesize or the graph is
    /// structurally invalid.
    pub fn build_pipeline(&self) -> Result<StageGraph, PromoflowError> {
        let mut builder = PipelineBuilder::new(BUILD_PIPELINE)
            .with_trigger_policy(self.config.build_trigger.policy())
            .with_tag("environment", &self.config.dev_stack.environment);
        if self.config.publish_tag {
            builder = builder.with_grant(BridgeGrant::write(&self.config.bridge_prefix)?);
        }
        Self::assemble(builder, self.build_stages("Deploy")?)
    }

    /// Builds the promotion pipeline: Source, Build (synthesis with the tag
    /// read from the trigger handoff or the bridge), DeployStaging (deploy,
    /// then approval), DeployProd.
    ///
    /// # Errors
    ///
    /// Returns an error if descriptions fail to synthesize or the graph is
    /// structurally invalid.
    pub fn promotion_pipeline(&self) -> Result<StageGraph, PromoflowError> {
        let grant = BridgeGrant::read(&self.config.bridge_key)?;
        let client = self.bridge_client(PROMOTION_PIPELINE, vec![grant.clone()]);

        let mut stages = vec![self.source_stage(&self.config.promotion_branch, artifacts::PROMOTION_SOURCE)];
        stages.extend(self.promotion_stages(
            "Build",
            artifacts::PROMOTION_SOURCE,
            false,
            Some(client),
        )?);

        let builder = PipelineBuilder::new(PROMOTION_PIPELINE)
            .with_trigger_policy(self.config.promotion_trigger.policy())
            .with_tag("environment", &self.config.prod_stack.environment)
            .with_grant(grant);
        Self::assemble(builder, stages)
    }

    /// Builds the single-graph release: the dev pipeline followed by the
    /// promotion stages, handing the tag over directly from the image build.
    ///
    /// # Errors
    ///
    /// Returns an error if descriptions fail to synthesize or the graph is
    /// structurally invalid.
    pub fn combined_pipeline(&self) -> Result<StageGraph, PromoflowError> {
        let mut stages = self.build_stages("DeployDev")?;
        stages.extend(self.promotion_stages(
            "PromotionBuild",
            artifacts::IMAGE_BUILD,
            true,
            None,
        )?);

        let mut builder = PipelineBuilder::new(RELEASE_PIPELINE)
            .with_trigger_policy(self.config.build_trigger.policy())
            .with_tag("environment", &self.config.prod_stack.environment);
        if self.config.publish_tag {
            builder = builder.with_grant(BridgeGrant::write(&self.config.bridge_prefix)?);
        }
        Self::assemble(builder, stages)
    }
}
