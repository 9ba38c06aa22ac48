//! External collaborators the orchestrator drives but does not implement:
//! the source host, the image builder/registry, and the provisioning engine.

use crate::bridge::ParameterBridge;
use crate::description::{DescriptionFormat, ImageRepository};
use crate::errors::CollaboratorError;
use crate::gate::ApprovalService;
use crate::utils::iso_timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A fetched source revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRevision {
    /// `owner/repository`.
    pub repository: String,
    /// The branch.
    pub branch: String,
    /// The revision identifier.
    pub revision: String,
}

/// Fetches source revisions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetches `revision` of `branch` in `repository`.
    ///
    /// # Errors
    ///
    /// Returns `CollaboratorError` if the revision cannot be fetched.
    async fn fetch(&self, repository: &str, branch: &str, revision: &str) -> Result<SourceRevision, CollaboratorError>;
}

/// A source provider that accepts whatever revision the trigger names.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughSource;

#[async_trait]
impl SourceProvider for PassthroughSource {
    async fn fetch(&self, repository: &str, branch: &str, revision: &str) -> Result<SourceRevision, CollaboratorError> {
        if revision.trim().is_empty() {
            return Err(CollaboratorError::new("source", "trigger carries no revision"));
        }
        Ok(SourceRevision {
            repository: repository.to_string(),
            branch: branch.to_string(),
            revision: revision.to_string(),
        })
    }
}

/// An image pushed to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltImage {
    /// Repository name.
    pub repository: String,
    /// Repository URI.
    pub uri: String,
    /// The tag the image was pushed with.
    pub tag: String,
}

impl BuiltImage {
    /// Returns `uri:tag`.
    #[must_use]
    pub fn image_name(&self) -> String {
        format!("{}:{}", self.uri, self.tag)
    }
}

/// Builds images and pushes them to the registry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Builds the image for `repository` and pushes it tagged `tag`.
    ///
    /// # Errors
    ///
    /// Returns `CollaboratorError` if the build or push fails.
    async fn build_and_push(&self, repository: &ImageRepository, tag: &str) -> Result<BuiltImage, CollaboratorError>;
}

/// A request to apply a description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Target stack.
    pub stack_name: String,
    /// Environment tag.
    pub environment: String,
    /// The description text, exactly as synthesized.
    pub template: String,
    /// The description format.
    pub format: DescriptionFormat,
    /// SHA-256 of `template`.
    pub digest: String,
    /// Deployment parameter values.
    pub parameters: BTreeMap<String, String>,
}

/// Acknowledgement from the provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReceipt {
    /// Target stack.
    pub stack_name: String,
    /// The engine's deployment identifier.
    pub deployment_id: String,
    /// When the engine accepted the request.
    pub applied_at: String,
}

impl DeployReceipt {
    /// Creates a receipt stamped now.
    #[must_use]
    pub fn new(stack_name: impl Into<String>, deployment_id: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            deployment_id: deployment_id.into(),
            applied_at: iso_timestamp(),
        }
    }
}

/// Applies infrastructure descriptions.
///
/// Partial application on failure is the engine's concern; the orchestrator
/// only stops scheduling further stages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Applies a description.
    ///
    /// # Errors
    ///
    /// Returns `CollaboratorError` if the engine rejects or fails the deploy.
    async fn deploy(&self, request: DeployRequest) -> Result<DeployReceipt, CollaboratorError>;
}

/// Everything a release topology talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Source host.
    pub source: Arc<dyn SourceProvider>,
    /// Image builder and registry.
    pub images: Arc<dyn ImageBuilder>,
    /// Provisioning engine.
    pub provisioner: Arc<dyn Provisioner>,
    /// Parameter bridge store.
    pub bridge: Arc<dyn ParameterBridge>,
    /// Approval service for gates.
    pub approvals: Arc<ApprovalService>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("approvals", &self.approvals)
            .finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Bundles collaborators with a passthrough source and a default
    /// approval service.
    #[must_use]
    pub fn new(
        images: Arc<dyn ImageBuilder>,
        provisioner: Arc<dyn Provisioner>,
        bridge: Arc<dyn ParameterBridge>,
    ) -> Self {
        Self {
            source: Arc::new(PassthroughSource),
            images,
            provisioner,
            bridge,
            approvals: Arc::new(ApprovalService::default()),
        }
    }

    /// Sets the source provider.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn SourceProvider>) -> Self {
        self.source = source;
        self
    }

    /// Sets the approval service.
    #[must_use]
    pub fn with_approvals(mut self, approvals: Arc<ApprovalService>) -> Self {
        self.approvals = approvals;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_source() {
        let source = PassthroughSource;
        let fetched = source.fetch("org/app", "develop", "abc123").await.unwrap();
        assert_eq!(fetched.revision, "abc123");
        assert!(source.fetch("org/app", "develop", " ").await.is_err());
    }

    #[test]
    fn test_built_image_name() {
        let image = BuiltImage {
            repository: "app".to_string(),
            uri: "registry.example.com/app".to_string(),
            tag: "abc123".to_string(),
        };
        assert_eq!(image.image_name(), "registry.example.com/app:abc123");
    }
}
