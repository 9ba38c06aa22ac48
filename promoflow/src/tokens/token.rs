//! Deferred tokens and late-bound slots.

use crate::errors::DescriptionGenerationError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// The earliest point at which a token's value may be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Known while descriptions are generated.
    Synthesis,
    /// Known only when the pipeline runs (e.g. a build's image tag).
    Execution,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synthesis => write!(f, "synthesis"),
            Self::Execution => write!(f, "execution"),
        }
    }
}

/// A placeholder for a value produced later than the point where it is referenced.
///
/// A token is a cheap handle: the producer lives in the
/// [`TokenRegistry`](super::TokenRegistry) that created it. Tokens embed
/// into descriptions as a stable marker string (`${Token[label.id]}`) which
/// a [`ResolutionPass`](super::ResolutionPass) substitutes in one walk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeferredToken {
    id: u64,
    label: String,
    availability: Availability,
}

impl DeferredToken {
    pub(crate) fn new(label: &str, availability: Availability) -> Self {
        Self {
            id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
            label: sanitize_label(label),
            availability,
        }
    }

    /// Returns the process-unique token id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the human-readable label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns when the token becomes resolvable.
    #[must_use]
    pub fn availability(&self) -> Availability {
        self.availability
    }

    /// Returns the placeholder marker embedded in descriptions.
    #[must_use]
    pub fn marker(&self) -> String {
        format!("${{Token[{}.{}]}}", self.label, self.id)
    }

    /// Returns the marker as a JSON string value.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::String(self.marker())
    }
}

impl fmt::Display for DeferredToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.marker())
    }
}

impl From<&DeferredToken> for serde_json::Value {
    fn from(token: &DeferredToken) -> Self {
        token.to_value()
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "Token".to_string()
    } else {
        cleaned
    }
}

/// A producer's dependency has not been assigned yet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{dependency}' has not been assigned")]
pub struct MissingDependency {
    /// The name of the missing value.
    pub dependency: String,
}

impl MissingDependency {
    /// Creates a new missing dependency marker.
    #[must_use]
    pub fn new(dependency: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
        }
    }
}

/// A write-once slot that producers read lazily.
///
/// Producers capture a clone of the slot; the value is assigned later in the
/// description phase (for example when a reference is bound into a stack).
pub struct LateBound<T> {
    name: String,
    slot: Arc<RwLock<Option<T>>>,
}

impl<T> Clone for LateBound<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for LateBound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LateBound")
            .field("name", &self.name)
            .field("value", &*self.slot.read())
            .finish()
    }
}

impl<T: Clone> LateBound<T> {
    /// Creates an unassigned slot.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: Arc::new(RwLock::new(None)),
        }
    }

    /// Returns the slot name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assigns the value.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBound` if the slot already holds a value.
    pub fn assign(&self, value: T) -> Result<(), DescriptionGenerationError> {
        let mut slot = self.slot.write();
        if slot.is_some() {
            return Err(DescriptionGenerationError::AlreadyBound {
                slot: self.name.clone(),
            });
        }
        *slot = Some(value);
        Ok(())
    }

    /// Reads the value.
    ///
    /// # Errors
    ///
    /// Returns `MissingDependency` naming this slot if it is unassigned.
    pub fn get(&self) -> Result<T, MissingDependency> {
        self.slot
            .read()
            .clone()
            .ok_or_else(|| MissingDependency::new(self.name.clone()))
    }

    /// Returns true once a value has been assigned.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.slot.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_format() {
        let token = DeferredToken::new("ImageTag", Availability::Execution);
        assert_eq!(token.marker(), format!("${{Token[ImageTag.{}]}}", token.id()));
        assert_eq!(token.to_string(), token.marker());
    }

    #[test]
    fn test_labels_are_sanitized() {
        let token = DeferredToken::new("app image}[name]", Availability::Synthesis);
        assert_eq!(token.label(), "app_image__name_");
        assert!(!DeferredToken::new("", Availability::Synthesis).label().is_empty());
    }

    #[test]
    fn test_token_ids_are_unique() {
        let a = DeferredToken::new("A", Availability::Synthesis);
        let b = DeferredToken::new("A", Availability::Synthesis);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.marker(), b.marker());
    }

    #[test]
    fn test_availability_ordering() {
        assert!(Availability::Synthesis < Availability::Execution);
        assert_eq!(Availability::Execution.to_string(), "execution");
    }

    #[test]
    fn test_late_bound_lifecycle() {
        let slot: LateBound<String> = LateBound::new("ParamName");
        assert!(!slot.is_bound());
        assert_eq!(slot.get(), Err(MissingDependency::new("ParamName")));

        let reader = slot.clone();
        slot.assign("AppPipelineParam".to_string()).unwrap();

        assert!(reader.is_bound());
        assert_eq!(reader.get().unwrap(), "AppPipelineParam");
    }

    #[test]
    fn test_late_bound_rejects_second_assignment() {
        let slot: LateBound<u32> = LateBound::new("Port");
        slot.assign(80).unwrap();

        let err = slot.assign(443).unwrap_err();
        assert!(matches!(err, DescriptionGenerationError::AlreadyBound { slot } if slot == "Port"));
        assert_eq!(slot.get().unwrap(), 80);
    }
}
