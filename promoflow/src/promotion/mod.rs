//! Release composition: the dev build pipeline, the staging/production
//! promotion pipeline, and the actions and collaborators they use.
//!
//! The image tag travels from the build to the promotion either directly,
//! when both run in one graph, or through the parameter bridge.

pub mod actions;
pub mod collaborators;
pub mod config;
pub mod topology;


pub use actions::{
    BridgeBinding, DeployAction, ImageBuildAction, Lineage, SourceAction, SynthesizeAction,
    TagLookup,
};
pub use collaborators::{
    BuiltImage, Collaborators, DeployReceipt, DeployRequest, ImageBuilder, PassthroughSource,
    Provisioner, SourceProvider, SourceRevision,
};
pub use config::{ReleaseConfig, SourceTrigger, StackConfig};
pub use topology::{
    ReleaseTopology, APPROVAL_ACTION, BUILD_PIPELINE, PROMOTION_PIPELINE, RELEASE_PIPELINE,
};

/// The field holding the image tag in [`files::IMAGE_TAG`].
pub const IMAGE_TAG_FIELD: &str = "imageTag";

/// Artifact names passed between release stages.
pub mod artifacts {
    /// The dev source checkout.
    pub const SOURCE: &str = "SourceOutput";
    /// The image build result, including `imageTag.json`.
    pub const IMAGE_BUILD: &str = "ImageBuildOutput";
    /// The dev environment description.
    pub const DEV_DESCRIPTIONS: &str = "DevDescriptions";
    /// The promotion source checkout.
    pub const PROMOTION_SOURCE: &str = "PromotionSourceOutput";
    /// Staging and production descriptions plus the promoted `imageTag.json`.
    pub const PROMOTION_BUILD: &str = "PromotionBuildOutput";
}

/// File names inside release artifacts.
pub mod files {
    /// `{"imageTag": "<tag>"}`.
    pub const IMAGE_TAG: &str = "imageTag.json";
    /// The pushed images.
    pub const IMAGES: &str = "images.json";
    /// The fetched revision.
    pub const SOURCE: &str = "source.json";
}
