//! Scripted actions for exercising the stage graph engine.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{ActionOutput, Artifact};
use crate::errors::ApprovalError;
use crate::pipeline::{Action, ActionContext};

/// Ordered record of action starts and finishes shared across actions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns all entries in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns the position of an entry.
    #[must_use]
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }
}

#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Fail(String),
    Stop(ApprovalError),
    Panic,
}

/// An action whose outcome is fixed up front.
///
/// Records `start:<name>` and `end:<name>` into an optional shared
/// [`ExecutionLog`], counts calls, and remembers which declared inputs were
/// present when it ran.
#[derive(Debug)]
pub struct ScriptedAction {
    name: String,
    behavior: Behavior,
    artifacts: Vec<Artifact>,
    delay: Option<Duration>,
    log: Option<ExecutionLog>,
    calls: Mutex<usize>,
    seen_inputs: Mutex<Vec<String>>,
}

impl ScriptedAction {
    fn with_behavior(name: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            artifacts: Vec::new(),
            delay: None,
            log: None,
            calls: Mutex::new(0),
            seen_inputs: Mutex::new(Vec::new()),
        }
    }

    /// An action that succeeds.
    #[must_use]
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::with_behavior(name, Behavior::Succeed)
    }

    /// An action that fails with `message`.
    #[must_use]
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_behavior(name, Behavior::Fail(message.into()))
    }

    /// An action that stops the pipeline with `reason`.
    #[must_use]
    pub fn stopping(name: impl Into<String>, reason: ApprovalError) -> Self {
        Self::with_behavior(name, Behavior::Stop(reason))
    }

    /// An action whose task panics.
    #[must_use]
    pub fn panicking(name: impl Into<String>) -> Self {
        Self::with_behavior(name, Behavior::Panic)
    }

    /// Adds an artifact to produce on success.
    #[must_use]
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Produces an empty artifact with each name on success.
    #[must_use]
    pub fn producing(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.artifacts.extend(names.into_iter().map(Artifact::new));
        self
    }

    /// Sleeps before finishing.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Records starts and finishes into `log`.
    #[must_use]
    pub fn with_log(mut self, log: &ExecutionLog) -> Self {
        self.log = Some(log.clone());
        self
    }

    /// Returns how many times the action ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }

    /// Returns the declared inputs that were present on the last run.
    #[must_use]
    pub fn seen_inputs(&self) -> Vec<String> {
        self.seen_inputs.lock().clone()
    }
}

#[async_trait]
impl Action for ScriptedAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ActionContext) -> ActionOutput {
        *self.calls.lock() += 1;
        if let Some(log) = &self.log {
            log.push(format!("start:{}", self.name));
        }
        *self.seen_inputs.lock() = ctx
            .inputs()
            .declared()
            .iter()
            .filter(|name| ctx.inputs().contains(name))
            .cloned()
            .collect();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let output = match &self.behavior {
            Behavior::Succeed => ActionOutput::succeeded(self.artifacts.clone()),
            Behavior::Fail(message) => ActionOutput::failed(message.clone()),
            Behavior::Stop(reason) => ActionOutput::stopped(reason.clone()),
            Behavior::Panic => panic!("scripted panic in {}", self.name),
        };

        if let Some(log) = &self.log {
            log.push(format!("end:{}", self.name));
        }
        output
    }
}
