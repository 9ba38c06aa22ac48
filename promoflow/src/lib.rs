//! # Promoflow
//!
//! Staged release orchestration: build a container image once, carry its tag
//! through independently synthesized environment descriptions, and promote
//! it from dev through staging to production behind a human approval.
//!
//! Promoflow provides:
//!
//! - **Deferred values**: description-time placeholders for values (an image
//!   tag) that only exist once the pipeline runs, with phase-checked
//!   resolution
//! - **Stage graphs**: strictly ordered stages of concurrently running
//!   actions, with `run_order` sub-ordering and atomic stage failure
//! - **Promotion pipelines**: the dev build pipeline and the gated
//!   staging/production pipeline, composed from one release configuration
//! - **Approval gates**: blocking actions resolved by an external decision or
//!   a timeout
//! - **Parameter bridge**: a durable, permission-scoped key-value store for
//!   handing the tag between pipelines that share no execution graph
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use promoflow::prelude::*;
//!
//! let topology = ReleaseTopology::new(ReleaseConfig::default(), collaborators)?;
//!
//! let build = topology.build_pipeline()?;
//! build.execute(RunContext::new(TriggerInputs::automatic("abc123", "develop"))).await?;
//!
//! let promotion = Arc::new(topology.promotion_pipeline()?);
//! let handle = promotion.spawn(RunContext::new(TriggerInputs::manual("abc123", "master")));
//! let request = topology.approvals().next_pending().await;
//! topology.approvals().decide(request.execution_id, &request.gate, Decision::approve("lead"))?;
//! let report = handle.wait().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod bridge;
pub mod core;
pub mod description;
pub mod errors;
pub mod events;
pub mod gate;
pub mod observability;
pub mod pipeline;
pub mod promotion;
pub mod testing;
pub mod tokens;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bridge::{
        BridgeGrant, BridgeRecord, FileParameterBridge, InMemoryParameterBridge, ParameterBridge,
        ScopedBridge,
    };
    pub use crate::core::{
        ActionKind, ActionOutput, ActionStatus, Artifact, ArtifactFile, ExecutionStatus,
        StageStatus,
    };
    pub use crate::description::{
        Blueprint, ContainerSpec, Description, DescriptionFormat, EnvironmentStack,
        ImageRepository, ValueSource,
    };
    pub use crate::errors::{
        ActionExecutionError, ApprovalError, BridgeError, ContractErrorInfo, CycleDetectedError,
        DescriptionGenerationError, PipelineValidationError, PromoflowError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::gate::{ApprovalGateAction, ApprovalService, Decision, GateState, Notifier};
    pub use crate::pipeline::{
        Action, ActionContext, ActionSpec, ExecutionHandle, ExecutionReport, PipelineBuilder,
        RunContext, StageGraph, StageSpec, TriggerInputs, TriggerMode, TriggerPolicy,
    };
    pub use crate::promotion::{
        Collaborators, ImageBuilder, Provisioner, ReleaseConfig, ReleaseTopology, SourceProvider,
    };
    pub use crate::tokens::{Availability, DeferredToken, TokenRegistry};
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
