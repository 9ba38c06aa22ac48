//! Testing utilities for release pipelines.
//!
//! This module provides:
//! - Scripted actions and a shared execution log for stage graph tests
//! - Recording collaborators (provisioner, image builder, notifier)

mod actions;
mod collaborators;

pub use actions::{ExecutionLog, ScriptedAction};
pub use collaborators::{
    AppliedDescription, CollectingNotifier, RecordingImageBuilder, RecordingProvisioner,
};
