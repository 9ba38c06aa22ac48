//! In-memory collaborators that record what the orchestrator asked of them.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::description::{apply_parameters, Description, ImageRepository};
use crate::errors::{CollaboratorError, NotifyError};
use crate::gate::{ApprovalRequest, Notifier};
use crate::promotion::{BuiltImage, DeployReceipt, DeployRequest, ImageBuilder, Provisioner};

/// A deploy the provisioner accepted, with parameters substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedDescription {
    /// The request as received.
    pub request: DeployRequest,
    /// The description tree after parameter substitution.
    pub applied: Value,
}

/// A provisioner that applies parameters the way a real engine would and
/// keeps every accepted request.
#[derive(Debug, Default)]
pub struct RecordingProvisioner {
    applied: Mutex<Vec<AppliedDescription>>,
    failing_stack: Option<String>,
    counter: AtomicU64,
}

impl RecordingProvisioner {
    /// Creates a provisioner that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provisioner that rejects deploys of `stack`.
    #[must_use]
    pub fn failing_on(stack: impl Into<String>) -> Self {
        Self {
            failing_stack: Some(stack.into()),
            ..Self::default()
        }
    }

    /// Returns accepted deploys in order.
    #[must_use]
    pub fn applied(&self) -> Vec<AppliedDescription> {
        self.applied.lock().clone()
    }

    /// Returns the stack names deployed, in order.
    #[must_use]
    pub fn deployed_stacks(&self) -> Vec<String> {
        self.applied
            .lock()
            .iter()
            .map(|a| a.request.stack_name.clone())
            .collect()
    }

    /// Returns the most recent deploy of `stack`.
    #[must_use]
    pub fn last_deploy(&self, stack: &str) -> Option<AppliedDescription> {
        self.applied
            .lock()
            .iter()
            .rev()
            .find(|a| a.request.stack_name == stack)
            .cloned()
    }

    /// Returns the distinct parameter values of the most recent deploy of
    /// `stack`.
    #[must_use]
    pub fn parameter_values(&self, stack: &str) -> Vec<String> {
        let mut values: Vec<String> = self
            .last_deploy(stack)
            .map(|a| a.request.parameters.into_values().collect())
            .unwrap_or_default();
        values.sort();
        values.dedup();
        values
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn deploy(&self, request: DeployRequest) -> Result<DeployReceipt, CollaboratorError> {
        if self.failing_stack.as_deref() == Some(request.stack_name.as_str()) {
            return Err(CollaboratorError::new(
                "provisioner",
                format!("stack '{}' rolled back", request.stack_name),
            ));
        }

        let template = Description::parse(&request.stack_name, request.format, &request.template)
            .map_err(|e| CollaboratorError::new("provisioner", e.to_string()))?;
        let applied = apply_parameters(&template, &request.parameters)
            .map_err(|e| CollaboratorError::new("provisioner", e.to_string()))?;

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let receipt = DeployReceipt::new(&request.stack_name, format!("deploy-{n}"));
        self.applied.lock().push(AppliedDescription { request, applied });
        Ok(receipt)
    }
}

/// An image builder that records pushes without building anything.
#[derive(Debug, Default)]
pub struct RecordingImageBuilder {
    pushed: Mutex<Vec<BuiltImage>>,
    failure: Option<String>,
}

impl RecordingImageBuilder {
    /// Creates a builder that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder that fails every build with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Returns pushed images in order.
    #[must_use]
    pub fn pushed(&self) -> Vec<BuiltImage> {
        self.pushed.lock().clone()
    }
}

#[async_trait]
impl ImageBuilder for RecordingImageBuilder {
    async fn build_and_push(
        &self,
        repository: &ImageRepository,
        tag: &str,
    ) -> Result<BuiltImage, CollaboratorError> {
        if let Some(message) = &self.failure {
            return Err(CollaboratorError::new("image builder", message.clone()));
        }
        let image = BuiltImage {
            repository: repository.name.clone(),
            uri: repository.uri.clone(),
            tag: tag.to_string(),
        };
        self.pushed.lock().push(image.clone());
        Ok(image)
    }
}

/// A notifier that keeps every request it was asked to deliver.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    requests: Mutex<Vec<ApprovalRequest>>,
    fail: bool,
}

impl CollectingNotifier {
    /// Creates a notifier that delivers successfully.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a notifier that records requests but reports failure.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Returns the requests received.
    #[must_use]
    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, request: &ApprovalRequest) -> Result<(), NotifyError> {
        self.requests.lock().push(request.clone());
        if self.fail {
            return Err(NotifyError::new(&request.gate, "mail relay unreachable"));
        }
        Ok(())
    }
}
