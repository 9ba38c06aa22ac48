//! Synthesizing every environment description of a release in one pass.

use super::document::{Description, DescriptionFormat};
use super::overrides::{ParameterName, ResolvedOverrides, ValueSource};
use super::reference::ImageRepository;
use super::stack::{EmitsDescription, EnvironmentStack};
use crate::errors::DescriptionGenerationError;
use crate::tokens::{has_markers, TokenRegistry};
use std::collections::BTreeSet;

/// The release's environment stacks and image repositories.
///
/// A blueprint is immutable once built; each [`synthesize`](Self::synthesize)
/// call runs a fresh description phase with its own token registry.
#[derive(Debug, Clone, Default)]
pub struct Blueprint {
    repositories: Vec<ImageRepository>,
    stacks: Vec<EnvironmentStack>,
    format: DescriptionFormat,
    extra_overrides: Vec<(String, ParameterName, ValueSource)>,
}

impl Blueprint {
    /// Creates a blueprint over the given repositories.
    #[must_use]
    pub fn new(repositories: Vec<ImageRepository>) -> Self {
        Self {
            repositories,
            ..Self::default()
        }
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: DescriptionFormat) -> Self {
        self.format = format;
        self
    }

    /// Adds an environment stack.
    #[must_use]
    pub fn with_stack(mut self, stack: EnvironmentStack) -> Self {
        self.stacks.push(stack);
        self
    }

    /// Adds an explicit override for a stack's parameter.
    #[must_use]
    pub fn with_override(
        mut self,
        stack: impl Into<String>,
        parameter: ParameterName,
        source: ValueSource,
    ) -> Self {
        self.extra_overrides.push((stack.into(), parameter, source));
        self
    }

    /// Returns the stacks.
    #[must_use]
    pub fn stacks(&self) -> &[EnvironmentStack] {
        &self.stacks
    }

    /// Returns the output format.
    #[must_use]
    pub fn format(&self) -> DescriptionFormat {
        self.format
    }

    /// Returns a blueprint restricted to the named stacks.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStack` if a name is not part of this blueprint.
    pub fn select(&self, names: &[&str]) -> Result<Self, DescriptionGenerationError> {
        let mut stacks = Vec::with_capacity(names.len());
        for name in names {
            let stack = self
                .stacks
                .iter()
                .find(|s| s.name == *name)
                .ok_or_else(|| DescriptionGenerationError::UnknownStack {
                    stack: (*name).to_string(),
                })?;
            stacks.push(stack.clone());
        }
        Ok(Self {
            repositories: self.repositories.clone(),
            stacks,
            format: self.format,
            extra_overrides: self
                .extra_overrides
                .iter()
                .filter(|(stack, _, _)| names.contains(&stack.as_str()))
                .cloned()
                .collect(),
        })
    }

    /// Generates every description, wiring each image parameter to `tag_source`.
    ///
    /// Runs the description phase (drafting stacks, binding references),
    /// seals the registry, then renders in a synthesis pass. Overrides are
    /// checked against declared parameters before anything is returned.
    ///
    /// # Errors
    ///
    /// Any [`DescriptionGenerationError`]: unknown stacks in overrides,
    /// unresolved token dependencies, invalid overrides, render failures.
    pub fn synthesize(
        &self,
        tag_source: &ValueSource,
    ) -> Result<SynthesisOutput, DescriptionGenerationError> {
        for (stack, _, _) in &self.extra_overrides {
            if !self.stacks.iter().any(|s| &s.name == stack) {
                return Err(DescriptionGenerationError::UnknownStack {
                    stack: stack.clone(),
                });
            }
        }

        let mut registry = TokenRegistry::new();
        let mut drafts = Vec::with_capacity(self.stacks.len());
        for stack in &self.stacks {
            let mut draft = stack.draft(&mut registry, &self.repositories, tag_source)?;
            for (_, parameter, source) in self
                .extra_overrides
                .iter()
                .filter(|(name, _, _)| name == &stack.name)
            {
                draft.overrides.set_named(parameter.clone(), source.clone());
            }
            drafts.push(draft);
        }

        let sealed = registry.seal();
        let pass = sealed.synthesis_pass().memoized();

        let mut output = SynthesisOutput::default();
        for draft in drafts {
            let parameters = draft
                .parameters
                .iter()
                .map(|token| pass.resolve(token).map(ParameterName::new))
                .collect::<Result<BTreeSet<_>, _>>()?;
            let overrides = draft.overrides.resolve(&pass, &parameters)?;

            let body = pass.render(&draft.body)?;
            if has_markers(&body) {
                return Err(DescriptionGenerationError::Render {
                    stack: draft.stack_name,
                    message: "rendered description still contains token markers".to_string(),
                });
            }

            tracing::debug!(
                stack = %draft.stack_name,
                environment = %draft.environment,
                parameters = parameters.len(),
                "Synthesized description"
            );

            output.descriptions.push(Description {
                stack_name: draft.stack_name,
                environment: draft.environment,
                format: self.format,
                parameters,
                body,
            });
            output.overrides.push(overrides);
        }

        Ok(output)
    }
}

/// The descriptions and validated overrides of one synthesis.
#[derive(Debug, Clone, Default)]
pub struct SynthesisOutput {
    /// One description per stack, in blueprint order.
    pub descriptions: Vec<Description>,
    /// One override set per stack, in blueprint order.
    pub overrides: Vec<ResolvedOverrides>,
}

impl SynthesisOutput {
    /// Returns the description for a stack.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStack` if no description was synthesized for it.
    pub fn description(&self, stack: &str) -> Result<&Description, DescriptionGenerationError> {
        self.descriptions
            .iter()
            .find(|d| d.stack_name == stack)
            .ok_or_else(|| DescriptionGenerationError::UnknownStack {
                stack: stack.to_string(),
            })
    }

    /// Returns the overrides for a stack.
    #[must_use]
    pub fn overrides_for(&self, stack: &str) -> Option<&ResolvedOverrides> {
        self.overrides.iter().find(|o| o.stack_name == stack)
    }
}
