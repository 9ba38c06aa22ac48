//! Concrete release actions: source fetch, image build, description
//! synthesis (with image tag lookup), and deploy.

use super::collaborators::{DeployRequest, ImageBuilder, Provisioner, SourceProvider};
use super::{files, IMAGE_TAG_FIELD};
use crate::bridge::ScopedBridge;
use crate::core::{ActionOutput, Artifact, ArtifactFile};
use crate::description::{Blueprint, Description, DescriptionFormat, ImageRepository, ResolvedOverrides, ValueSource};
use crate::errors::ActionExecutionError;
use crate::pipeline::{Action, ActionContext};
use crate::utils::sha256_hex;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

fn finish(ctx: &ActionContext, result: Result<Vec<Artifact>, ActionExecutionError>) -> ActionOutput {
    match result {
        Ok(artifacts) => ActionOutput::succeeded(artifacts),
        Err(e) => {
            warn!(stage = %ctx.stage(), action = %ctx.action(), error = %e.message, "Release action failed");
            ActionOutput::failed(e.message)
        }
    }
}

/// A bridge client bound to one key.
#[derive(Debug, Clone)]
pub struct BridgeBinding {
    client: ScopedBridge,
    key: String,
}

impl BridgeBinding {
    /// Binds `client` to `key`.
    #[must_use]
    pub fn new(client: ScopedBridge, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Fetches the triggering revision and records it as an artifact.
pub struct SourceAction {
    name: String,
    provider: Arc<dyn SourceProvider>,
    repository: String,
    branch: String,
    output: String,
}

impl fmt::Debug for SourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceAction")
            .field("name", &self.name)
            .field("repository", &self.repository)
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

impl SourceAction {
    /// Creates a source action tracking `branch` of `repository`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn SourceProvider>,
        repository: impl Into<String>,
        branch: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            repository: repository.into(),
            branch: branch.into(),
            output: output.into(),
        }
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Vec<Artifact>, ActionExecutionError> {
        let trigger = ctx.trigger();
        if trigger.branch != self.branch {
            return Err(ctx.error(format!(
                "revision {} is on branch '{}' but the pipeline tracks '{}'",
                trigger.revision, trigger.branch, self.branch
            )));
        }

        let fetched = self
            .provider
            .fetch(&self.repository, &self.branch, &trigger.revision)
            .await
            .map_err(|e| ctx.error(e.to_string()))?;
        info!(repository = %fetched.repository, revision = %fetched.revision, "Source fetched");

        Ok(vec![Artifact::new(&self.output).with_json(
            files::SOURCE,
            json!({
                "repository": fetched.repository,
                "branch": fetched.branch,
                "revision": fetched.revision,
            }),
        )])
    }
}

#[async_trait]
impl Action for SourceAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ActionContext) -> ActionOutput {
        finish(ctx, self.run(ctx).await)
    }
}

/// Builds every image at the source revision, tags it with that revision,
/// writes `imageTag.json`, and optionally publishes the tag to the bridge.
pub struct ImageBuildAction {
    name: String,
    builder: Arc<dyn ImageBuilder>,
    repositories: Vec<ImageRepository>,
    source: String,
    output: String,
    publish: Option<BridgeBinding>,
}

impl fmt::Debug for ImageBuildAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuildAction")
            .field("name", &self.name)
            .field("repositories", &self.repositories)
            .field("publish", &self.publish)
            .finish_non_exhaustive()
    }
}

impl ImageBuildAction {
    /// Creates an image build reading the revision from `source`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        builder: Arc<dyn ImageBuilder>,
        repositories: Vec<ImageRepository>,
        source: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            builder,
            repositories,
            source: source.into(),
            output: output.into(),
            publish: None,
        }
    }

    /// Publishes the built tag to the bridge.
    #[must_use]
    pub fn with_publish(mut self, binding: BridgeBinding) -> Self {
        self.publish = Some(binding);
        self
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Vec<Artifact>, ActionExecutionError> {
        let revision = ctx
            .artifact(&self.source)?
            .json_field(files::SOURCE, "revision")
            .map_err(|e| ctx.error(e.to_string()))?;

        let mut images = Vec::with_capacity(self.repositories.len());
        for repository in &self.repositories {
            let image = self
                .builder
                .build_and_push(repository, &revision)
                .await
                .map_err(|e| ctx.error(e.to_string()))?;
            info!(image = %image.image_name(), "Image pushed");
            images.push(image);
        }

        let images = serde_json::to_value(&images).map_err(|e| ctx.error(e.to_string()))?;
        let mut artifact = Artifact::new(&self.output)
            .with_json(files::IMAGE_TAG, json!({ IMAGE_TAG_FIELD: revision }))
            .with_json(files::IMAGES, images);

        if let Some(publish) = &self.publish {
            let record = publish
                .client
                .put(&publish.key, &revision)
                .await
                .map_err(|e| ctx.error(e.to_string()))?;
            artifact = artifact.with_metadata(
                "bridge",
                json!({ "key": record.key, "version": record.version }),
            );
        }

        Ok(vec![artifact])
    }
}

#[async_trait]
impl Action for ImageBuildAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ActionContext) -> ActionOutput {
        finish(ctx, self.run(ctx).await)
    }
}

/// How a promotion learned its image tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Lineage {
    /// Read from a build artifact in the same execution graph.
    Artifact {
        /// The artifact name.
        artifact: String,
    },
    /// Handed over on the trigger.
    Trigger,
    /// Read from the bridge; the build that wrote it may not be the one that
    /// prompted this promotion.
    Bridge {
        /// The bridge key.
        key: String,
        /// Version of the value read.
        version: u64,
        /// When that version was written.
        last_modified: String,
    },
}

impl Lineage {
    /// Returns true if the tag came from the triggering build itself.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        !matches!(self, Self::Bridge { .. })
    }
}

/// Resolves the image tag for a promotion.
///
/// Precedence: a build artifact in the same graph, then a tag handed over on
/// the trigger, then the bridge.
#[derive(Debug, Clone, Default)]
pub struct TagLookup {
    handoff: Option<String>,
    bridge: Option<BridgeBinding>,
}

impl TagLookup {
    /// Creates a lookup with no sources besides the trigger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the tag from `artifact` when the action has it as an input.
    #[must_use]
    pub fn with_handoff(mut self, artifact: impl Into<String>) -> Self {
        self.handoff = Some(artifact.into());
        self
    }

    /// Falls back to the bridge.
    #[must_use]
    pub fn with_bridge(mut self, binding: BridgeBinding) -> Self {
        self.bridge = Some(binding);
        self
    }

    /// Resolves the tag and reports where it came from.
    ///
    /// # Errors
    ///
    /// Returns an `ActionExecutionError` if no source yields a tag or the
    /// bridge read fails.
    pub async fn resolve(&self, ctx: &ActionContext) -> Result<(String, Lineage), ActionExecutionError> {
        if let Some(artifact) = self.handoff.as_deref().filter(|a| ctx.inputs().contains(a)) {
            let tag = ctx
                .artifact(artifact)?
                .json_field(files::IMAGE_TAG, IMAGE_TAG_FIELD)
                .map_err(|e| ctx.error(e.to_string()))?;
            return Ok((
                tag,
                Lineage::Artifact {
                    artifact: artifact.to_string(),
                },
            ));
        }

        if let Some(tag) = &ctx.trigger().handoff_tag {
            return Ok((tag.clone(), Lineage::Trigger));
        }

        let Some(bridge) = &self.bridge else {
            return Err(ctx.error("no image tag source: no handoff artifact, trigger tag, or bridge"));
        };
        let record = bridge
            .client
            .get(&bridge.key)
            .await
            .map_err(|e| ctx.error(e.to_string()))?;
        Ok((
            record.value,
            Lineage::Bridge {
                key: record.key,
                version: record.version,
                last_modified: record.last_modified,
            },
        ))
    }
}

/// Synthesizes environment descriptions into one artifact.
///
/// For each stack the artifact holds `<Stack>.template.<ext>` and
/// `<Stack>.overrides.json`, with a SHA-256 digest per stack in the
/// `digests` metadata. With a [`TagLookup`], the resolved tag is also
/// written to `imageTag.json` and its lineage recorded.
#[derive(Debug, Clone)]
pub struct SynthesizeAction {
    name: String,
    blueprint: Blueprint,
    output: String,
    tag_source: ValueSource,
    lookup: Option<TagLookup>,
}

impl SynthesizeAction {
    /// Creates a synthesis whose image parameters are overridden from `tag_source`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        blueprint: Blueprint,
        output: impl Into<String>,
        tag_source: ValueSource,
    ) -> Self {
        Self {
            name: name.into(),
            blueprint,
            output: output.into(),
            tag_source,
            lookup: None,
        }
    }

    /// Resolves the image tag into the output artifact.
    #[must_use]
    pub fn with_tag_lookup(mut self, lookup: TagLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Vec<Artifact>, ActionExecutionError> {
        let resolved = match &self.lookup {
            Some(lookup) => Some(lookup.resolve(ctx).await?),
            None => None,
        };

        let synthesized = self
            .blueprint
            .synthesize(&self.tag_source)
            .map_err(|e| ctx.error(e.to_string()))?;

        let mut artifact = Artifact::new(&self.output);
        let mut digests = serde_json::Map::new();
        for description in &synthesized.descriptions {
            let text = description.render().map_err(|e| ctx.error(e.to_string()))?;
            digests.insert(description.stack_name.clone(), Value::String(sha256_hex(&text)));
            artifact = artifact.with_text(description.file_name(), text);
        }
        for overrides in &synthesized.overrides {
            let value = serde_json::to_value(overrides).map_err(|e| ctx.error(e.to_string()))?;
            artifact = artifact.with_json(overrides.file_name(), value);
        }
        artifact = artifact.with_metadata("digests", Value::Object(digests));

        if let Some((tag, lineage)) = resolved {
            if !lineage.is_direct() {
                warn!(tag = %tag, "Image tag read from bridge; it reflects the latest build, not necessarily this revision");
            }
            info!(tag = %tag, lineage = ?lineage, "Image tag resolved");
            let lineage = serde_json::to_value(&lineage).map_err(|e| ctx.error(e.to_string()))?;
            artifact = artifact
                .with_json(files::IMAGE_TAG, json!({ IMAGE_TAG_FIELD: tag }))
                .with_metadata("lineage", lineage);
        }

        Ok(vec![artifact])
    }
}

#[async_trait]
impl Action for SynthesizeAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ActionContext) -> ActionOutput {
        finish(ctx, self.run(ctx).await)
    }
}

/// Applies one stack's synthesized description with its parameter overrides.
pub struct DeployAction {
    name: String,
    provisioner: Arc<dyn Provisioner>,
    stack_name: String,
    environment: String,
    format: DescriptionFormat,
    descriptions: String,
    bridge: Option<ScopedBridge>,
}

impl fmt::Debug for DeployAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployAction")
            .field("name", &self.name)
            .field("stack_name", &self.stack_name)
            .field("descriptions", &self.descriptions)
            .finish_non_exhaustive()
    }
}

impl DeployAction {
    /// Creates a deploy of `stack_name` reading from the `descriptions` artifact.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        provisioner: Arc<dyn Provisioner>,
        stack_name: impl Into<String>,
        environment: impl Into<String>,
        format: DescriptionFormat,
        descriptions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            provisioner,
            stack_name: stack_name.into(),
            environment: environment.into(),
            format,
            descriptions: descriptions.into(),
            bridge: None,
        }
    }

    /// Lets bridge-sourced overrides be read through `bridge`.
    #[must_use]
    pub fn with_bridge(mut self, bridge: ScopedBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    async fn resolve_source(&self, ctx: &ActionContext, source: &ValueSource) -> Result<String, ActionExecutionError> {
        match source {
            ValueSource::Literal { value } => Ok(value.clone()),
            ValueSource::ArtifactField { artifact, file, field } => ctx
                .artifact(artifact)?
                .json_field(file, field)
                .map_err(|e| ctx.error(e.to_string())),
            ValueSource::Bridge { key } => {
                let bridge = self
                    .bridge
                    .as_ref()
                    .ok_or_else(|| ctx.error(format!("override reads bridge key '{key}' but no bridge client is configured")))?;
                bridge
                    .get(key)
                    .await
                    .map(|record| record.value)
                    .map_err(|e| ctx.error(e.to_string()))
            }
        }
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Vec<Artifact>, ActionExecutionError> {
        let descriptions = ctx.artifact(&self.descriptions)?;

        let template_file = Description::file_name_for(&self.stack_name, self.format);
        let template = descriptions
            .file(&template_file)
            .map(ArtifactFile::as_text)
            .ok_or_else(|| ctx.error(format!("artifact '{}' has no '{template_file}'", self.descriptions)))?;

        let digest = sha256_hex(&template);
        let expected = descriptions
            .metadata
            .get("digests")
            .and_then(|d| d.get(&self.stack_name))
            .and_then(Value::as_str);
        if expected.is_some_and(|e| e != digest) {
            return Err(ctx.error(format!("description '{template_file}' does not match its recorded digest")));
        }

        let overrides_file = ResolvedOverrides::file_name_for(&self.stack_name);
        let overrides: ResolvedOverrides = match descriptions.file(&overrides_file) {
            Some(ArtifactFile::Json(value)) => serde_json::from_value(value.clone()),
            Some(ArtifactFile::Text(text)) => serde_json::from_str(text),
            None => {
                return Err(ctx.error(format!(
                    "artifact '{}' has no '{overrides_file}'",
                    self.descriptions
                )))
            }
        }
        .map_err(|e| ctx.error(format!("invalid overrides file: {e}")))?;

        let mut parameters = BTreeMap::new();
        for (name, source) in &overrides.entries {
            parameters.insert(name.to_string(), self.resolve_source(ctx, source).await?);
        }

        let receipt = self
            .provisioner
            .deploy(DeployRequest {
                stack_name: self.stack_name.clone(),
                environment: self.environment.clone(),
                template,
                format: self.format,
                digest,
                parameters,
            })
            .await
            .map_err(|e| ctx.error(e.to_string()))?;

        info!(
            stack = %receipt.stack_name,
            deployment_id = %receipt.deployment_id,
            environment = %self.environment,
            "Description applied"
        );
        Ok(Vec::new())
    }
}

#[async_trait]
impl Action for DeployAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ActionContext) -> ActionOutput {
        finish(ctx, self.run(ctx).await)
    }
}
