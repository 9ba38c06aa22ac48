//! Release topology configuration.

use crate::description::{ContainerSpec, DescriptionFormat, EnvironmentStack, ImageRepository};
use crate::errors::{ConfigError, PromoflowError};
use crate::pipeline::TriggerPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// How a pipeline's source stage is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTrigger {
    /// Polls the branch; manual runs are also accepted.
    Poll,
    /// Only runs when invoked by an operator.
    Manual,
}

impl SourceTrigger {
    /// Returns the trigger policy the pipeline enforces.
    #[must_use]
    pub fn policy(&self) -> TriggerPolicy {
        match self {
            Self::Poll => TriggerPolicy::Any,
            Self::Manual => TriggerPolicy::ManualOnly,
        }
    }
}

/// One environment stack to describe and deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Stack name (`DevAppStack`).
    pub name: String,
    /// Environment tag (`dev`).
    pub environment: String,
    /// Desired service task count.
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
}

impl StackConfig {
    /// Creates a stack configuration with one task.
    #[must_use]
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            environment: environment.into(),
            desired_count: default_desired_count(),
        }
    }

    /// Builds the environment stack running `containers`.
    #[must_use]
    pub fn to_stack(&self, containers: &[ContainerSpec]) -> EnvironmentStack {
        containers.iter().cloned().fold(
            EnvironmentStack::new(&self.name, &self.environment).with_desired_count(self.desired_count),
            EnvironmentStack::with_container,
        )
    }
}

/// Configuration of one release topology: a build pipeline for dev and a
/// promotion pipeline for staging and production.
///
/// Immutable once loaded; components receive it by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Source repository owner.
    #[serde(default = "default_source_owner")]
    pub source_owner: String,
    /// Source repository name.
    #[serde(default = "default_source_repository")]
    pub source_repository: String,
    /// Branch the build pipeline tracks.
    #[serde(default = "default_dev_branch")]
    pub dev_branch: String,
    /// Branch the promotion pipeline tracks.
    #[serde(default = "default_promotion_branch")]
    pub promotion_branch: String,
    /// Trigger of the build pipeline.
    #[serde(default = "default_build_trigger")]
    pub build_trigger: SourceTrigger,
    /// Trigger of the promotion pipeline.
    #[serde(default = "default_promotion_trigger")]
    pub promotion_trigger: SourceTrigger,
    /// Image repositories built from each revision.
    #[serde(default = "default_repositories")]
    pub repositories: Vec<ImageRepository>,
    /// Containers every environment stack runs.
    #[serde(default = "default_containers")]
    pub containers: Vec<ContainerSpec>,
    /// The dev stack, deployed by the build pipeline.
    #[serde(default = "default_dev_stack")]
    pub dev_stack: StackConfig,
    /// The staging stack.
    #[serde(default = "default_staging_stack")]
    pub staging_stack: StackConfig,
    /// The production stack.
    #[serde(default = "default_prod_stack")]
    pub prod_stack: StackConfig,
    /// Whether the build publishes its tag to the bridge.
    #[serde(default = "default_publish_tag")]
    pub publish_tag: bool,
    /// Bridge key holding the latest dev build tag.
    #[serde(default = "default_bridge_key")]
    pub bridge_key: String,
    /// Key prefix the build pipeline may write under.
    #[serde(default = "default_bridge_prefix")]
    pub bridge_prefix: String,
    /// Reviewer addresses notified by the staging gate.
    #[serde(default = "default_reviewers")]
    pub reviewers: Vec<String>,
    /// Seconds the staging gate waits before expiring; waits forever if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_timeout_secs: Option<u64>,
    /// Output format of infrastructure descriptions.
    #[serde(default)]
    pub description_format: DescriptionFormat,
}

fn default_source_owner() -> String {
    "example-org".to_string()
}

fn default_source_repository() -> String {
    "release-app".to_string()
}

fn default_dev_branch() -> String {
    "develop".to_string()
}

fn default_promotion_branch() -> String {
    "master".to_string()
}

fn default_build_trigger() -> SourceTrigger {
    SourceTrigger::Poll
}

fn default_promotion_trigger() -> SourceTrigger {
    SourceTrigger::Manual
}

fn default_repositories() -> Vec<ImageRepository> {
    vec![
        ImageRepository::new("app", "registry.example.com/release-app/app"),
        ImageRepository::new("nginx", "registry.example.com/release-app/nginx"),
    ]
}

fn default_containers() -> Vec<ContainerSpec> {
    vec![
        ContainerSpec::new("app", "app", 8080),
        ContainerSpec::new("nginx", "nginx", 80),
    ]
}

fn default_desired_count() -> u32 {
    1
}

fn default_dev_stack() -> StackConfig {
    StackConfig::new("DevAppStack", "dev")
}

fn default_staging_stack() -> StackConfig {
    StackConfig::new("StagingAppStack", "staging")
}

fn default_prod_stack() -> StackConfig {
    StackConfig::new("ProdAppStack", "prod")
}

fn default_publish_tag() -> bool {
    true
}

fn default_bridge_key() -> String {
    "latest-dev-tag".to_string()
}

fn default_bridge_prefix() -> String {
    "latest-".to_string()
}

fn default_reviewers() -> Vec<String> {
    vec!["release-approvers@example.com".to_string()]
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            source_owner: default_source_owner(),
            source_repository: default_source_repository(),
            dev_branch: default_dev_branch(),
            promotion_branch: default_promotion_branch(),
            build_trigger: default_build_trigger(),
            promotion_trigger: default_promotion_trigger(),
            repositories: default_repositories(),
            containers: default_containers(),
            dev_stack: default_dev_stack(),
            staging_stack: default_staging_stack(),
            prod_stack: default_prod_stack(),
            publish_tag: default_publish_tag(),
            bridge_key: default_bridge_key(),
            bridge_prefix: default_bridge_prefix(),
            reviewers: default_reviewers(),
            approval_timeout_secs: None,
            description_format: DescriptionFormat::default(),
        }
    }
}

impl ReleaseConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates JSON configuration text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the text does not parse or fails validation.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates YAML configuration text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the text does not parse or fails validation.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file; `.yaml`/`.yml` files are read as YAML,
    /// anything else as JSON.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, or `Config` if it is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PromoflowError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        let config = if yaml {
            Self::from_yaml_str(&text)?
        } else {
            Self::from_json_str(&text)?
        };
        tracing::debug!(path = %path.display(), "Loaded release configuration");
        Ok(config)
    }

    /// Sets the source repository.
    #[must_use]
    pub fn with_source(mut self, owner: impl Into<String>, repository: impl Into<String>) -> Self {
        self.source_owner = owner.into();
        self.source_repository = repository.into();
        self
    }

    /// Sets the branches of the build and promotion pipelines.
    #[must_use]
    pub fn with_branches(mut self, dev: impl Into<String>, promotion: impl Into<String>) -> Self {
        self.dev_branch = dev.into();
        self.promotion_branch = promotion.into();
        self
    }

    /// Sets the image repositories.
    #[must_use]
    pub fn with_repositories(mut self, repositories: Vec<ImageRepository>) -> Self {
        self.repositories = repositories;
        self
    }

    /// Sets the containers every stack runs.
    #[must_use]
    pub fn with_containers(mut self, containers: Vec<ContainerSpec>) -> Self {
        self.containers = containers;
        self
    }

    /// Sets the bridge key and the prefix the build may write under.
    #[must_use]
    pub fn with_bridge_key(mut self, key: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.bridge_key = key.into();
        self.bridge_prefix = prefix.into();
        self
    }

    /// Enables or disables publishing the build tag to the bridge.
    #[must_use]
    pub fn with_publish_tag(mut self, publish: bool) -> Self {
        self.publish_tag = publish;
        self
    }

    /// Sets the reviewer addresses.
    #[must_use]
    pub fn with_reviewers(mut self, reviewers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.reviewers = reviewers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the approval timeout.
    #[must_use]
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Sets the description format.
    #[must_use]
    pub fn with_description_format(mut self, format: DescriptionFormat) -> Self {
        self.description_format = format;
        self
    }

    /// Returns the approval timeout.
    #[must_use]
    pub fn approval_timeout(&self) -> Option<Duration> {
        self.approval_timeout_secs.map(Duration::from_secs)
    }

    /// Returns `owner/repository`.
    #[must_use]
    pub fn source_slug(&self) -> String {
        format!("{}/{}", self.source_owner, self.source_repository)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("source_owner", &self.source_owner),
            ("source_repository", &self.source_repository),
            ("dev_branch", &self.dev_branch),
            ("promotion_branch", &self.promotion_branch),
            ("bridge_key", &self.bridge_key),
            ("bridge_prefix", &self.bridge_prefix),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }

        if !self.bridge_key.starts_with(&self.bridge_prefix) {
            return Err(ConfigError::invalid(
                "bridge_key",
                format!(
                    "'{}' is outside the writable prefix '{}'",
                    self.bridge_key, self.bridge_prefix
                ),
            ));
        }

        if self.repositories.is_empty() {
            return Err(ConfigError::invalid("repositories", "at least one image repository is required"));
        }
        let mut repositories = HashSet::new();
        for repository in &self.repositories {
            if repository.name.trim().is_empty() || repository.uri.trim().is_empty() {
                return Err(ConfigError::invalid("repositories", "name and uri must not be empty"));
            }
            if !repositories.insert(repository.name.as_str()) {
                return Err(ConfigError::invalid(
                    "repositories",
                    format!("duplicate repository '{}'", repository.name),
                ));
            }
        }

        if self.containers.is_empty() {
            return Err(ConfigError::invalid("containers", "at least one container is required"));
        }
        if let Some(container) = self
            .containers
            .iter()
            .find(|c| !repositories.contains(c.repository.as_str()))
        {
            return Err(ConfigError::invalid(
                "containers",
                format!(
                    "container '{}' uses unknown repository '{}'",
                    container.name, container.repository
                ),
            ));
        }
        let mut containers = HashSet::new();
        for container in &self.containers {
            if !containers.insert(container.name.as_str()) {
                return Err(ConfigError::invalid(
                    "containers",
                    format!("duplicate container '{}'", container.name),
                ));
            }
        }

        let mut stacks = HashSet::new();
        for (field, stack) in [
            ("dev_stack", &self.dev_stack),
            ("staging_stack", &self.staging_stack),
            ("prod_stack", &self.prod_stack),
        ] {
            if stack.name.trim().is_empty() || stack.environment.trim().is_empty() {
                return Err(ConfigError::invalid(field, "name and environment must not be empty"));
            }
            if !stacks.insert(stack.name.as_str()) {
                return Err(ConfigError::invalid(
                    field,
                    format!("stack name '{}' is used twice", stack.name),
                ));
            }
        }

        if self.reviewers.iter().all(|r| r.trim().is_empty()) {
            return Err(ConfigError::invalid("reviewers", "at least one reviewer is required"));
        }
        if self.approval_timeout_secs == Some(0) {
            return Err(ConfigError::invalid("approval_timeout_secs", "must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReleaseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bridge_key, "latest-dev-tag");
        assert_eq!(config.dev_stack.name, "DevAppStack");
        assert_eq!(config.promotion_trigger.policy(), TriggerPolicy::ManualOnly);
        assert_eq!(config.source_slug(), "example-org/release-app");
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = ReleaseConfig::from_json_str(
            r#"{"dev_branch": "main", "approval_timeout_secs": 3600, "description_format": "yaml"}"#,
        )
        .unwrap();

        assert_eq!(config.dev_branch, "main");
        assert_eq!(config.approval_timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(config.description_format, DescriptionFormat::Yaml);
        assert_eq!(config.repositories.len(), 2);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(ReleaseConfig::from_json_str("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_bridge_key_must_sit_in_prefix() {
        let err = ReleaseConfig::new()
            .with_bridge_key("prod-tag", "latest-")
            .validate()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::invalid("bridge_key", "'prod-tag' is outside the writable prefix 'latest-'")
        );
    }

    #[test]
    fn test_duplicate_stack_names_rejected() {
        let mut config = ReleaseConfig::new();
        config.prod_stack.name = "StagingAppStack".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "prod_stack"
        ));
    }

    #[test]
    fn test_duplicate_container_names_rejected() {
        let config = ReleaseConfig::new().with_containers(vec![
            ContainerSpec::new("app", "app", 8080),
            ContainerSpec::new("app", "nginx", 80),
        ]);
        match config.validate() {
            Err(ConfigError::Invalid { field, message }) => {
                assert_eq!(field, "containers");
                assert!(message.contains("duplicate container 'app'"), "{message}");
            }
            other => panic!("expected invalid containers, got {other:?}"),
        }
    }

    #[test]
    fn test_reviewers_required() {
        let config = ReleaseConfig::new().with_reviewers(Vec::<String>::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_container_repository_must_exist() {
        let config = ReleaseConfig::new().with_containers(vec![ContainerSpec::new("worker", "worker", 80)]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "containers"
        ));
    }

    #[test]
    fn test_from_file_reads_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "dev_branch: trunk\nreviewers:\n  - lead@example.com").unwrap();

        let config = ReleaseConfig::from_file(file.path()).unwrap();
        assert_eq!(config.dev_branch, "trunk");
        assert_eq!(config.reviewers, vec!["lead@example.com"]);
    }

    #[test]
    fn test_stack_config_builds_stack() {
        let stack = StackConfig::new("ProdAppStack", "prod").to_stack(&default_containers());
        assert_eq!(stack.containers.len(), 2);
        assert_eq!(stack.environment, "prod");
    }
}
