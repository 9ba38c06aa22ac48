//! Status and kind enums for stages, actions and executions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Fetches a source revision.
    Source,
    /// Builds images or generates descriptions.
    Build,
    /// Applies a description through the provisioning collaborator.
    Deploy,
    /// Blocks on a human decision.
    Approval,
    /// Any other unit of work.
    #[default]
    Invoke,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Build => write!(f, "build"),
            Self::Deploy => write!(f, "deploy"),
            Self::Approval => write!(f, "approval"),
            Self::Invoke => write!(f, "invoke"),
        }
    }
}

/// The execution status of a stage or of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet scheduled.
    #[default]
    Pending,
    /// Currently running.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Failed; halts the pipeline.
    Failed,
    /// Halted by an approval gate; requires a full re-trigger.
    Stopped,
}

/// Actions move through the same states as stages.
pub type ActionStatus = StageStatus;

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Stopped)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if the status halts forward progress.
    #[must_use]
    pub fn halts(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

/// The status of a whole pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created but not started.
    #[default]
    Pending,
    /// Stages are being scheduled.
    Running,
    /// Every stage succeeded.
    Succeeded,
    /// A stage failed.
    Failed,
    /// An approval gate rejected or expired.
    Stopped,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl ExecutionStatus {
    /// Returns true if the execution has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Stopped)
    }
}
