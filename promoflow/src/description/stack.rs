//! Environment stacks and the description-emitting capability.

use super::overrides::{ParameterOverrides, ValueSource};
use super::reference::{ArtifactReference, ImageRepository};
use crate::errors::{DescriptionGenerationError, PipelineValidationError};
use crate::tokens::{DeferredToken, TokenRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// A container in an environment stack's service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Name of the image repository the container runs.
    pub repository: String,
    /// Exposed container port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    80
}

impl ContainerSpec {
    /// Creates a container spec.
    #[must_use]
    pub fn new(name: impl Into<String>, repository: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            repository: repository.into(),
            port,
        }
    }
}

/// The infrastructure of one environment (`DevAppStack`, `ProdAppStack`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentStack {
    /// Stack name, also the description file stem.
    pub name: String,
    /// Environment tag.
    pub environment: String,
    /// Containers of the stack's service.
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    /// Desired number of running service tasks.
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
}

fn default_desired_count() -> u32 {
    1
}

impl EnvironmentStack {
    /// Creates a stack with no containers.
    #[must_use]
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            environment: environment.into(),
            containers: Vec::new(),
            desired_count: default_desired_count(),
        }
    }

    /// Adds a container.
    #[must_use]
    pub fn with_container(mut self, container: ContainerSpec) -> Self {
        self.containers.push(container);
        self
    }

    /// Sets the desired task count.
    #[must_use]
    pub fn with_desired_count(mut self, count: u32) -> Self {
        self.desired_count = count;
        self
    }
}

/// A description tree with markers still embedded, plus what it declared.
#[derive(Debug, Clone)]
pub struct StackDraft {
    /// The stack name.
    pub stack_name: String,
    /// The environment tag.
    pub environment: String,
    /// Tokens naming the declared deployment parameters.
    pub parameters: Vec<DeferredToken>,
    /// The unrendered body.
    pub body: Value,
    /// Overrides for the declared parameters.
    pub overrides: ParameterOverrides,
    /// The artifact references bound into this draft.
    pub references: Vec<ArtifactReference>,
}

/// Something that can emit an infrastructure description.
pub trait EmitsDescription {
    /// Returns the stack name.
    fn stack_name(&self) -> &str;

    /// Returns the environment tag.
    fn environment(&self) -> &str;

    /// Drafts the description, creating and binding its artifact references.
    ///
    /// # Errors
    ///
    /// Returns a description error if the stack cannot be drafted.
    fn draft(
        &self,
        registry: &mut TokenRegistry,
        repositories: &[ImageRepository],
        tag_source: &ValueSource,
    ) -> Result<StackDraft, DescriptionGenerationError>;
}

impl EmitsDescription for EnvironmentStack {
    fn stack_name(&self) -> &str {
        &self.name
    }

    fn environment(&self) -> &str {
        &self.environment
    }

    fn draft(
        &self,
        registry: &mut TokenRegistry,
        repositories: &[ImageRepository],
        tag_source: &ValueSource,
    ) -> Result<StackDraft, DescriptionGenerationError> {
        let mut parameters = Map::new();
        let mut containers = Vec::with_capacity(self.containers.len());
        let mut references = Vec::with_capacity(self.containers.len());
        let mut names = HashSet::new();

        for container in &self.containers {
            if !names.insert(container.name.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Stack '{}' declares container '{}' more than once",
                    self.name, container.name
                ))
                .with_involved(vec![self.name.clone(), container.name.clone()])
                .into());
            }
            let repository = repositories
                .iter()
                .find(|r| r.name == container.repository)
                .ok_or_else(|| {
                    PipelineValidationError::new(format!(
                        "Stack '{}' container '{}' uses unknown image repository '{}'",
                        self.name, container.name, container.repository
                    ))
                    .with_involved(vec![self.name.clone(), container.name.clone()])
                })?;

            let reference = ArtifactReference::new(registry, repository.clone(), &self.environment);
            parameters.insert(
                reference.parameter_name().marker(),
                json!({
                    "Type": "String",
                    "Description": format!("Image tag for {} ({})", repository.name, self.environment),
                }),
            );
            containers.push(json!({
                "Name": container.name,
                "Image": reference.image_name().marker(),
                "Essential": true,
                "PortMappings": [{ "ContainerPort": container.port }],
            }));
            references.push(reference);
        }

        let body = json!({
            "Description": format!("{} release stack ({})", self.name, self.environment),
            "Metadata": { "Environment": self.environment },
            "Parameters": parameters,
            "Resources": {
                "Service": {
                    "Type": "Promoflow::ContainerService",
                    "Properties": {
                        "ServiceName": self.name,
                        "DesiredCount": self.desired_count,
                        "Containers": containers,
                    }
                }
            }
        });

        let mut overrides = ParameterOverrides::new(&self.name);
        for (reference, container) in references.iter().zip(&self.containers) {
            reference.bind(&format!("{}/{}", self.name, container.name))?;
            overrides.set(reference.parameter_name(), tag_source.clone());
        }

        Ok(StackDraft {
            stack_name: self.name.clone(),
            environment: self.environment.clone(),
            parameters: references.iter().map(|r| r.parameter_name().clone()).collect(),
            body,
            overrides,
            references,
        })
    }
}
