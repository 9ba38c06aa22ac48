//! Token registries for the description phase and the resolution phase.

use super::pass::{Execution, ResolutionPass, Synthesis};
use super::token::{Availability, DeferredToken, MissingDependency};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A token producer. Producers must be pure: the same inputs yield the same string.
pub(crate) type Producer = Arc<dyn Fn() -> Result<String, MissingDependency> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum TokenSource {
    /// Evaluated by calling the producer.
    Producer(Producer),
    /// Bound to a deployment parameter whose logical id is the named token.
    Parameter { name: DeferredToken },
}

#[derive(Clone)]
pub(crate) struct TokenEntry {
    pub(crate) token: DeferredToken,
    pub(crate) source: TokenSource,
}

/// The description-phase registry: the only place tokens are created.
///
/// A registry cannot resolve anything. Call [`seal`](Self::seal) once the
/// description graph is complete to obtain a [`SealedRegistry`], which hands
/// out phase-tagged [`ResolutionPass`]es.
#[derive(Default)]
pub struct TokenRegistry {
    entries: HashMap<u64, TokenEntry>,
}

impl fmt::Debug for TokenRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRegistry")
            .field("tokens", &self.entries.len())
            .finish()
    }
}

impl TokenRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a synthesis-time token backed by `producer`.
    pub fn create_token<F>(&mut self, label: &str, producer: F) -> DeferredToken
    where
        F: Fn() -> Result<String, MissingDependency> + Send + Sync + 'static,
    {
        self.create_token_at(label, Availability::Synthesis, producer)
    }

    /// Creates a token that may not be evaluated before `availability`.
    pub fn create_token_at<F>(
        &mut self,
        label: &str,
        availability: Availability,
        producer: F,
    ) -> DeferredToken
    where
        F: Fn() -> Result<String, MissingDependency> + Send + Sync + 'static,
    {
        let token = DeferredToken::new(label, availability);
        self.insert(token.clone(), TokenSource::Producer(Arc::new(producer)));
        token
    }

    /// Creates a synthesis-time token with a fixed value.
    pub fn constant(&mut self, label: &str, value: impl Into<String>) -> DeferredToken {
        let value = value.into();
        self.create_token(label, move || Ok(value.clone()))
    }

    /// Creates an execution-time token supplied through a deployment parameter.
    ///
    /// During synthesis the token renders as a reference to the parameter
    /// whose logical id `name` resolves to. During execution it resolves to
    /// the bound parameter value.
    pub fn parameter_token(&mut self, label: &str, name: &DeferredToken) -> DeferredToken {
        let token = DeferredToken::new(label, Availability::Execution);
        self.insert(
            token.clone(),
            TokenSource::Parameter { name: name.clone() },
        );
        token
    }

    /// Returns true if the token was created by this registry.
    #[must_use]
    pub fn contains(&self, token: &DeferredToken) -> bool {
        self.entries.contains_key(&token.id())
    }

    /// Returns the number of registered tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no tokens were created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ends the description phase.
    #[must_use]
    pub fn seal(self) -> SealedRegistry {
        SealedRegistry {
            entries: self.entries,
        }
    }

    fn insert(&mut self, token: DeferredToken, source: TokenSource) {
        tracing::trace!(token = %token.label(), id = token.id(), availability = %token.availability(), "Token created");
        self.entries.insert(token.id(), TokenEntry { token, source });
    }
}

/// An immutable registry from which resolution passes are taken.
pub struct SealedRegistry {
    entries: HashMap<u64, TokenEntry>,
}

impl fmt::Debug for SealedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedRegistry")
            .field("tokens", &self.entries.len())
            .finish()
    }
}

impl SealedRegistry {
    /// Starts a pass that may only evaluate synthesis-time tokens.
    #[must_use]
    pub fn synthesis_pass(&self) -> ResolutionPass<'_, Synthesis> {
        ResolutionPass::new(self, BTreeMap::new())
    }

    /// Starts a pass with deployment parameter values bound.
    #[must_use]
    pub fn execution_pass(&self, bindings: BTreeMap<String, String>) -> ResolutionPass<'_, Execution> {
        ResolutionPass::new(self, bindings)
    }

    /// Returns the number of registered tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no tokens were created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entry(&self, id: u64) -> Option<&TokenEntry> {
        self.entries.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_token_registers_entry() {
        let mut registry = TokenRegistry::new();
        let token = registry.create_token("Name", || Ok("value".to_string()));

        assert!(registry.contains(&token));
        assert_eq!(registry.len(), 1);
        assert_eq!(token.availability(), Availability::Synthesis);
    }

    #[test]
    fn test_parameter_token_is_execution_time() {
        let mut registry = TokenRegistry::new();
        let name = registry.constant("ParamName", "AppParam");
        let tag = registry.parameter_token("ImageTag", &name);

        assert_eq!(tag.availability(), Availability::Execution);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_tokens_from_other_registries_are_not_contained() {
        let mut first = TokenRegistry::new();
        let mut second = TokenRegistry::new();
        let token = first.constant("A", "a");
        second.constant("A", "a");

        assert!(!second.contains(&token));
    }

    #[test]
    fn test_seal_preserves_entries() {
        let mut registry = TokenRegistry::new();
        let token = registry.constant("A", "a");
        let sealed = registry.seal();

        assert_eq!(sealed.len(), 1);
        assert!(sealed.entry(token.id()).is_some());
    }
}
