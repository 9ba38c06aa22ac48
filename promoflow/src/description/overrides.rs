//! Typed deployment parameter overrides.

use crate::errors::DescriptionGenerationError;
use crate::tokens::{DeferredToken, ResolutionPass, Synthesis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The logical id of a deployment parameter declared by a description.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterName(String);

impl ParameterName {
    /// Creates a parameter name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParameterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParameterName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Where a deployment parameter's value comes from at deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueSource {
    /// A fixed value.
    Literal {
        /// The value.
        value: String,
    },
    /// A scalar field inside a JSON file of a pipeline artifact.
    ArtifactField {
        /// The artifact name.
        artifact: String,
        /// The file inside the artifact.
        file: String,
        /// Dot-separated field path.
        field: String,
    },
    /// A cross-boundary parameter bridge key.
    Bridge {
        /// The bridge key.
        key: String,
    },
}

impl ValueSource {
    /// Creates a literal source.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    /// Creates an artifact-field source.
    #[must_use]
    pub fn artifact_field(
        artifact: impl Into<String>,
        file: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::ArtifactField {
            artifact: artifact.into(),
            file: file.into(),
            field: field.into(),
        }
    }

    /// Creates a bridge source.
    #[must_use]
    pub fn bridge(key: impl Into<String>) -> Self {
        Self::Bridge { key: key.into() }
    }

    /// Returns the artifact this source reads, if any.
    #[must_use]
    pub fn artifact(&self) -> Option<&str> {
        match self {
            Self::ArtifactField { artifact, .. } => Some(artifact),
            _ => None,
        }
    }
}

/// Overrides collected while a description is drafted.
///
/// Keys are deferred parameter-name tokens (or explicit names); they are
/// resolved and checked against the description's declared parameters
/// before the description is emitted.
#[derive(Debug, Clone)]
pub struct ParameterOverrides {
    stack_name: String,
    by_token: Vec<(DeferredToken, ValueSource)>,
    by_name: Vec<(ParameterName, ValueSource)>,
}

impl ParameterOverrides {
    /// Creates an empty override set for a stack.
    #[must_use]
    pub fn new(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            by_token: Vec::new(),
            by_name: Vec::new(),
        }
    }

    /// Overrides the parameter whose name `token` resolves to.
    pub fn set(&mut self, token: &DeferredToken, source: ValueSource) {
        self.by_token.push((token.clone(), source));
    }

    /// Overrides a parameter by explicit name.
    pub fn set_named(&mut self, name: ParameterName, source: ValueSource) {
        self.by_name.push((name, source));
    }

    /// Returns the stack these overrides apply to.
    #[must_use]
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// Resolves keys and checks each against the declared parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOverride` for a key the description does not declare,
    /// or any resolution error from the key tokens.
    pub fn resolve(
        &self,
        pass: &ResolutionPass<'_, Synthesis>,
        declared: &BTreeSet<ParameterName>,
    ) -> Result<ResolvedOverrides, DescriptionGenerationError> {
        let mut entries = BTreeMap::new();
        let resolved_tokens = self
            .by_token
            .iter()
            .map(|(token, source)| Ok((ParameterName::new(pass.resolve(token)?), source)))
            .collect::<Result<Vec<_>, DescriptionGenerationError>>()?;

        let named = self.by_name.iter().map(|(name, source)| (name.clone(), source));
        for (name, source) in resolved_tokens.into_iter().chain(named) {
            if !declared.contains(&name) {
                return Err(DescriptionGenerationError::InvalidOverride {
                    stack: self.stack_name.clone(),
                    parameter: name.to_string(),
                });
            }
            entries.insert(name, source.clone());
        }

        Ok(ResolvedOverrides {
            stack_name: self.stack_name.clone(),
            entries,
        })
    }
}

/// Validated overrides for one description, carried to the deploy action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOverrides {
    /// The stack these overrides apply to.
    pub stack_name: String,
    /// Parameter name to value source.
    pub entries: BTreeMap<ParameterName, ValueSource>,
}

impl ResolvedOverrides {
    /// Returns the file name the overrides are stored under in an artifact.
    #[must_use]
    pub fn file_name(&self) -> String {
        Self::file_name_for(&self.stack_name)
    }

    /// Returns the overrides file name for a stack.
    #[must_use]
    pub fn file_name_for(stack_name: &str) -> String {
        format!("{stack_name}.overrides.json")
    }

    /// Returns the artifacts referenced by the value sources.
    #[must_use]
    pub fn artifacts(&self) -> BTreeSet<&str> {
        self.entries.values().filter_map(ValueSource::artifact).collect()
    }
}
