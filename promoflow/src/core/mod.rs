//! Core domain model types for promoflow.
//!
//! This module contains the fundamental types used throughout the orchestrator:
//! - Stage, action and execution status enums
//! - Artifacts passed between actions
//! - Action output type with factory methods

mod artifact;
mod output;
mod status;

pub use artifact::{Artifact, ArtifactFile};
pub use output::ActionOutput;
pub use status::{ActionKind, ActionStatus, ExecutionStatus, StageStatus};
