//! The action seam: trait, trigger inputs, and per-action context.

use crate::core::{ActionOutput, Artifact};
use crate::errors::{ActionExecutionError, UndeclaredArtifactError};
use crate::events::EventSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug};
use std::sync::Arc;
use uuid::Uuid;

/// A unit of work inside a stage.
///
/// Actions communicate only through declared artifacts (and the external
/// bridge). They receive cloned inputs and return their outputs.
#[async_trait]
pub trait Action: Send + Sync + Debug {
    /// Returns the name of the action.
    fn name(&self) -> &str;

    /// Executes the action.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The action context with declared input artifacts
    ///
    /// # Returns
    ///
    /// The action output: succeeded with artifacts, failed, or stopped.
    async fn execute(&self, ctx: &ActionContext) -> ActionOutput;
}

/// How a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Source polling or a webhook.
    #[default]
    Automatic,
    /// An operator invoked the pipeline.
    Manual,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Which trigger modes a pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolicy {
    /// Automatic and manual runs.
    #[default]
    Any,
    /// Manual runs only.
    ManualOnly,
}

impl TriggerPolicy {
    /// Returns true if a run in `mode` may start.
    #[must_use]
    pub fn admits(&self, mode: TriggerMode) -> bool {
        match self {
            Self::Any => true,
            Self::ManualOnly => mode == TriggerMode::Manual,
        }
    }
}

/// Inputs supplied by whoever starts a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInputs {
    /// Source revision identifier (commit hash).
    pub revision: String,
    /// Branch the revision belongs to.
    pub branch: String,
    /// Whether the run was started manually.
    #[serde(default)]
    pub mode: TriggerMode,
    /// An image tag handed over directly by an upstream build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_tag: Option<String>,
}

impl TriggerInputs {
    /// Creates inputs for an automatic run.
    #[must_use]
    pub fn automatic(revision: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            branch: branch.into(),
            mode: TriggerMode::Automatic,
            handoff_tag: None,
        }
    }

    /// Creates inputs for a manual run.
    #[must_use]
    pub fn manual(revision: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            mode: TriggerMode::Manual,
            ..Self::automatic(revision, branch)
        }
    }

    /// Sets a directly handed-over image tag.
    #[must_use]
    pub fn with_handoff_tag(mut self, tag: impl Into<String>) -> Self {
        self.handoff_tag = Some(tag.into());
        self
    }
}

/// Read-only view of the artifacts an action declared as inputs.
///
/// Reading an artifact that was not declared is an error even if it exists.
#[derive(Debug, Clone, Default)]
pub struct ActionInputs {
    artifacts: BTreeMap<String, Artifact>,
    declared: BTreeSet<String>,
    action: String,
}

impl ActionInputs {
    /// Creates an input view.
    #[must_use]
    pub fn new(
        artifacts: BTreeMap<String, Artifact>,
        declared: BTreeSet<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            artifacts,
            declared,
            action: action.into(),
        }
    }

    /// Gets a declared artifact.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredArtifactError` if `name` is not a declared input.
    pub fn get(&self, name: &str) -> Result<Option<&Artifact>, UndeclaredArtifactError> {
        if !self.declared.contains(name) {
            return Err(UndeclaredArtifactError::new(&self.action, name));
        }
        Ok(self.artifacts.get(name))
    }

    /// Returns the declared input names.
    #[must_use]
    pub fn declared(&self) -> &BTreeSet<String> {
        &self.declared
    }

    /// Returns true if a declared artifact is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.declared.contains(name) && self.artifacts.contains_key(name)
    }
}

/// Everything an action sees while it runs.
#[derive(Clone)]
pub struct ActionContext {
    execution_id: Uuid,
    pipeline: String,
    stage: String,
    action: String,
    run_order: u32,
    trigger: TriggerInputs,
    inputs: ActionInputs,
    events: Arc<dyn EventSink>,
}

impl Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("execution_id", &self.execution_id)
            .field("pipeline", &self.pipeline)
            .field("stage", &self.stage)
            .field("action", &self.action)
            .field("run_order", &self.run_order)
            .finish_non_exhaustive()
    }
}

impl ActionContext {
    /// Creates a context.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        execution_id: Uuid,
        pipeline: impl Into<String>,
        stage: impl Into<String>,
        action: impl Into<String>,
        run_order: u32,
        trigger: TriggerInputs,
        inputs: ActionInputs,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            execution_id,
            pipeline: pipeline.into(),
            stage: stage.into(),
            action: action.into(),
            run_order,
            trigger,
            inputs,
            events,
        }
    }

    /// Returns the execution id.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Returns the action name.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Returns the action's run order within its stage.
    #[must_use]
    pub fn run_order(&self) -> u32 {
        self.run_order
    }

    /// Returns the trigger inputs.
    #[must_use]
    pub fn trigger(&self) -> &TriggerInputs {
        &self.trigger
    }

    /// Returns the input view.
    #[must_use]
    pub fn inputs(&self) -> &ActionInputs {
        &self.inputs
    }

    /// Returns the event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Returns a declared, present input artifact.
    ///
    /// # Errors
    ///
    /// Returns an `ActionExecutionError` if the artifact is undeclared or absent.
    pub fn artifact(&self, name: &str) -> Result<&Artifact, ActionExecutionError> {
        match self.inputs.get(name) {
            Ok(Some(artifact)) => Ok(artifact),
            Ok(None) => Err(self.error(format!("input artifact '{name}' is not available"))),
            Err(e) => Err(self.error(e.to_string())),
        }
    }

    /// Builds an `ActionExecutionError` for this action.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> ActionExecutionError {
        ActionExecutionError::new(&self.stage, &self.action, message)
    }
}
