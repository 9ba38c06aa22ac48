//! Stage graph: declaration, validation, and execution.
//!
//! This module provides:
//! - Action and stage specifications with declared artifact flow
//! - A builder that validates the graph before anything runs
//! - The execution engine and its queryable execution state

mod action;
mod builder;
mod graph;
mod integration_tests;
mod spec;
mod tracker;

pub use action::{Action, ActionContext, ActionInputs, TriggerInputs, TriggerMode, TriggerPolicy};
pub use builder::PipelineBuilder;
pub use graph::{ExecutionHandle, RunContext, StageGraph};
pub use spec::{ActionSpec, StageSpec};
pub use tracker::{ActionRecord, ExecutionReport, ExecutionTracker, FailureInfo, StageRecord, StopInfo};
