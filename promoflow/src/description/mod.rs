//! Infrastructure descriptions for environment stacks.
//!
//! A [`Blueprint`] lists the release's [`EnvironmentStack`]s. Synthesizing it
//! creates one [`ArtifactReference`] per image per stack, renders each stack
//! into a [`Description`] whose image tags are deployment parameters, and
//! returns [`ResolvedOverrides`] telling the deploy action where each
//! parameter's value comes from.

mod blueprint;
mod document;
mod overrides;
mod reference;
mod stack;

pub use blueprint::{Blueprint, SynthesisOutput};
pub use document::{apply_parameters, Description, DescriptionFormat};
pub use overrides::{ParameterName, ParameterOverrides, ResolvedOverrides, ValueSource};
pub use reference::{ArtifactReference, ImageRepository};
pub use stack::{ContainerSpec, EmitsDescription, EnvironmentStack, StackDraft};
