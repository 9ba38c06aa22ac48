//! Phase-tagged resolution passes.

use super::registry::{SealedRegistry, TokenEntry, TokenSource};
use super::token::{Availability, DeferredToken};
use super::MARKER_PATTERN;
use crate::errors::{DescriptionGenerationError, UnresolvedDependencyError};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// A resolution phase, fixed at the type level.
pub trait Phase: sealed::Sealed + Send + Sync + 'static {
    /// The latest availability this phase may evaluate.
    const AVAILABILITY: Availability;
}

/// Description generation: execution-time tokens stay symbolic.
#[derive(Debug, Clone, Copy)]
pub struct Synthesis;

/// Pipeline execution: deployment parameters are bound.
#[derive(Debug, Clone, Copy)]
pub struct Execution;

impl sealed::Sealed for Synthesis {}
impl sealed::Sealed for Execution {}

impl Phase for Synthesis {
    const AVAILABILITY: Availability = Availability::Synthesis;
}

impl Phase for Execution {
    const AVAILABILITY: Availability = Availability::Execution;
}

/// A piece of a partially resolved string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fragment {
    Text(String),
    /// A reference to a deployment parameter, produced by `token`.
    Ref { parameter: String, token: String },
}

fn push_text(fragments: &mut Vec<Fragment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Fragment::Text(last)) = fragments.last_mut() {
        last.push_str(text);
    } else {
        fragments.push(Fragment::Text(text.to_string()));
    }
}

/// One walk over a sealed registry.
///
/// Producers are invoked on every resolution unless the pass is
/// [`memoized`](Self::memoized). A pass for phase `P` refuses to evaluate a
/// token whose availability is later than `P`.
pub struct ResolutionPass<'r, P: Phase> {
    registry: &'r SealedRegistry,
    bindings: BTreeMap<String, String>,
    cache: Option<Mutex<HashMap<u64, String>>>,
    _phase: PhantomData<P>,
}

impl<'r, P: Phase> ResolutionPass<'r, P> {
    pub(crate) fn new(registry: &'r SealedRegistry, bindings: BTreeMap<String, String>) -> Self {
        Self {
            registry,
            bindings,
            cache: None,
            _phase: PhantomData,
        }
    }

    /// Caches each token's value for the lifetime of this pass.
    #[must_use]
    pub fn memoized(mut self) -> Self {
        self.cache = Some(Mutex::new(HashMap::new()));
        self
    }

    /// Returns the phase this pass runs in.
    #[must_use]
    pub fn availability(&self) -> Availability {
        P::AVAILABILITY
    }

    /// Resolves a token to a concrete string.
    ///
    /// # Errors
    ///
    /// - `PrematureResolution` if the token (or a token it embeds) is not
    ///   available in this phase
    /// - `UnresolvedDependency` if a producer reads an unassigned slot
    /// - `TokenCycle` if the token embeds itself
    /// - `UnboundParameter` if an execution pass lacks a parameter value
    pub fn resolve(&self, token: &DeferredToken) -> Result<String, DescriptionGenerationError> {
        let entry = self.entry(token.id(), &token.marker())?;
        let mut stack = Vec::new();
        let fragments = self.token_fragments(entry, &mut stack)?;
        Self::plain(fragments)
    }

    /// Substitutes every marker in `text`.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve), plus `UnknownToken` for markers
    /// this registry did not create.
    pub fn resolve_str(&self, text: &str) -> Result<String, DescriptionGenerationError> {
        let mut stack = Vec::new();
        let fragments = self.text_fragments(text, &mut stack)?;
        Self::plain(fragments)
    }

    /// Renders a description tree, substituting markers in keys and values.
    ///
    /// In a synthesis pass, strings embedding execution-time parameter tokens
    /// become `{"Ref": name}` or `{"Fn::Join": ["", [...]]}` nodes.
    ///
    /// # Errors
    ///
    /// Same as [`resolve_str`](Self::resolve_str). Object keys must resolve
    /// to plain strings.
    pub fn render(&self, value: &Value) -> Result<Value, DescriptionGenerationError> {
        match value {
            Value::String(text) => {
                let mut stack = Vec::new();
                let fragments = self.text_fragments(text, &mut stack)?;
                Ok(Self::fragments_to_value(fragments))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.render(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut rendered = Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(self.resolve_str(key)?, self.render(item)?);
                }
                Ok(Value::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    fn entry(&self, id: u64, marker: &str) -> Result<&'r TokenEntry, DescriptionGenerationError> {
        self.registry
            .entry(id)
            .ok_or_else(|| DescriptionGenerationError::UnknownToken {
                marker: marker.to_string(),
            })
    }

    fn token_fragments(
        &self,
        entry: &'r TokenEntry,
        stack: &mut Vec<&'r TokenEntry>,
    ) -> Result<Vec<Fragment>, DescriptionGenerationError> {
        let token = &entry.token;
        if stack.iter().any(|e| e.token.id() == token.id()) {
            let mut chain: Vec<String> = stack.iter().map(|e| e.token.label().to_string()).collect();
            chain.push(token.label().to_string());
            return Err(DescriptionGenerationError::TokenCycle { chain });
        }

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().get(&token.id()) {
                return Ok(vec![Fragment::Text(hit.clone())]);
            }
        }

        stack.push(entry);
        let result = match &entry.source {
            TokenSource::Parameter { name } => self.parameter_fragments(token, name, stack),
            TokenSource::Producer(producer) => {
                if token.availability() > P::AVAILABILITY {
                    Err(DescriptionGenerationError::PrematureResolution {
                        token: token.label().to_string(),
                        available_at: token.availability(),
                        attempted_in: P::AVAILABILITY,
                    })
                } else {
                    match producer() {
                        Ok(raw) => self.text_fragments(&raw, stack),
                        Err(missing) => {
                            let chain = stack.iter().map(|e| e.token.label().to_string()).collect();
                            Err(UnresolvedDependencyError::new(token.label(), missing.dependency)
                                .with_chain(chain)
                                .into())
                        }
                    }
                }
            }
        };
        stack.pop();
        let fragments = result?;

        if let (Some(cache), [Fragment::Text(text)]) = (&self.cache, fragments.as_slice()) {
            cache.lock().insert(token.id(), text.clone());
        }
        Ok(fragments)
    }

    fn parameter_fragments(
        &self,
        token: &DeferredToken,
        name: &DeferredToken,
        stack: &mut Vec<&'r TokenEntry>,
    ) -> Result<Vec<Fragment>, DescriptionGenerationError> {
        let name_entry = self.entry(name.id(), &name.marker())?;
        let parameter = Self::plain(self.token_fragments(name_entry, stack)?)?;

        match P::AVAILABILITY {
            Availability::Synthesis => Ok(vec![Fragment::Ref {
                parameter,
                token: token.label().to_string(),
            }]),
            Availability::Execution => self
                .bindings
                .get(&parameter)
                .map(|value| vec![Fragment::Text(value.clone())])
                .ok_or(DescriptionGenerationError::UnboundParameter { parameter }),
        }
    }

    fn text_fragments(
        &self,
        text: &str,
        stack: &mut Vec<&'r TokenEntry>,
    ) -> Result<Vec<Fragment>, DescriptionGenerationError> {
        let mut fragments = Vec::new();
        let mut cursor = 0;

        for captures in MARKER_PATTERN.captures_iter(text) {
            let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            push_text(&mut fragments, &text[cursor..whole.start()]);
            cursor = whole.end();

            let id = inner
                .as_str()
                .rsplit_once('.')
                .and_then(|(_, id)| id.parse::<u64>().ok())
                .ok_or_else(|| DescriptionGenerationError::UnknownToken {
                    marker: whole.as_str().to_string(),
                })?;
            let entry = self.entry(id, whole.as_str())?;

            for fragment in self.token_fragments(entry, stack)? {
                match fragment {
                    Fragment::Text(t) => push_text(&mut fragments, &t),
                    reference @ Fragment::Ref { .. } => fragments.push(reference),
                }
            }
        }
        push_text(&mut fragments, &text[cursor..]);
        Ok(fragments)
    }

    fn plain(fragments: Vec<Fragment>) -> Result<String, DescriptionGenerationError> {
        let mut out = String::new();
        for fragment in fragments {
            match fragment {
                Fragment::Text(text) => out.push_str(&text),
                Fragment::Ref { token, .. } => {
                    return Err(DescriptionGenerationError::PrematureResolution {
                        token,
                        available_at: Availability::Execution,
                        attempted_in: P::AVAILABILITY,
                    })
                }
            }
        }
        Ok(out)
    }

    fn fragments_to_value(fragments: Vec<Fragment>) -> Value {
        let reference = |parameter: String| json!({ "Ref": parameter });
        match fragments.len() {
            0 => Value::String(String::new()),
            1 => match fragments.into_iter().next() {
                Some(Fragment::Ref { parameter, .. }) => reference(parameter),
                Some(Fragment::Text(text)) => Value::String(text),
                None => Value::String(String::new()),
            },
            _ => {
                let parts: Vec<Value> = fragments
                    .into_iter()
                    .map(|fragment| match fragment {
                        Fragment::Text(text) => Value::String(text),
                        Fragment::Ref { parameter, .. } => reference(parameter),
                    })
                    .collect();
                json!({ "Fn::Join": ["", parts] })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{LateBound, TokenRegistry};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_resolution_is_deterministic_within_a_pass() {
        let mut registry = TokenRegistry::new();
        let token = registry.create_token("Name", || Ok("web-service".to_string()));
        let sealed = registry.seal();
        let pass = sealed.synthesis_pass();

        assert_eq!(pass.resolve(&token).unwrap(), "web-service");
        assert_eq!(pass.resolve(&token).unwrap(), pass.resolve(&token).unwrap());
    }

    #[test]
    fn test_producers_are_reinvoked_without_memoization() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = TokenRegistry::new();
        let token = registry.create_token("Counted", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok("x".to_string())
        });
        let sealed = registry.seal();

        let pass = sealed.synthesis_pass();
        pass.resolve(&token).unwrap();
        pass.resolve(&token).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let memoized = sealed.synthesis_pass().memoized();
        memoized.resolve(&token).unwrap();
        memoized.resolve(&token).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unassigned_dependency_reports_chain() {
        let slot: LateBound<String> = LateBound::new("AppRef.parameterId");
        let reader = slot.clone();
        let mut registry = TokenRegistry::new();
        let inner = registry.create_token("ParamName", move || reader.get());
        let inner_marker = inner.marker();
        let outer = registry.create_token("ImageName", move || Ok(format!("repo:{inner_marker}")));
        let sealed = registry.seal();

        let err = sealed.synthesis_pass().resolve(&outer).unwrap_err();
        match err {
            DescriptionGenerationError::UnresolvedDependency(e) => {
                assert_eq!(e.token, "ParamName");
                assert_eq!(e.dependency, "AppRef.parameterId");
                assert_eq!(e.chain, vec!["ImageName".to_string(), "ParamName".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_late_assignment_before_sealing_resolves() {
        let slot: LateBound<String> = LateBound::new("Id");
        let reader = slot.clone();
        let mut registry = TokenRegistry::new();
        let token = registry.create_token("Id", move || reader.get());
        slot.assign("Generated42".to_string()).unwrap();
        let sealed = registry.seal();

        assert_eq!(sealed.synthesis_pass().resolve(&token).unwrap(), "Generated42");
    }

    #[test]
    fn test_synthesis_pass_refuses_execution_tokens() {
        let mut registry = TokenRegistry::new();
        let early = registry.create_token_at("BuildNumber", Availability::Execution, || {
            Ok("17".to_string())
        });
        let name = registry.constant("ParamName", "TagParam");
        let tag = registry.parameter_token("ImageTag", &name);
        let sealed = registry.seal();
        let pass = sealed.synthesis_pass();

        assert!(matches!(
            pass.resolve(&early),
            Err(DescriptionGenerationError::PrematureResolution { available_at: Availability::Execution, .. })
        ));
        assert!(matches!(
            pass.resolve(&tag),
            Err(DescriptionGenerationError::PrematureResolution { token, .. }) if token == "ImageTag"
        ));
        assert_eq!(sealed.execution_pass(BTreeMap::new()).resolve(&early).unwrap(), "17");
    }

    #[test]
    fn test_execution_pass_uses_bindings() {
        let mut registry = TokenRegistry::new();
        let name = registry.constant("ParamName", "AppParam");
        let tag = registry.parameter_token("ImageTag", &name);
        let sealed = registry.seal();

        let bindings = BTreeMap::from([("AppParam".to_string(), "abc123".to_string())]);
        assert_eq!(sealed.execution_pass(bindings).resolve(&tag).unwrap(), "abc123");

        assert!(matches!(
            sealed.execution_pass(BTreeMap::new()).resolve(&tag),
            Err(DescriptionGenerationError::UnboundParameter { parameter }) if parameter == "AppParam"
        ));
    }

    #[test]
    fn test_render_emits_refs_and_joins() {
        let mut registry = TokenRegistry::new();
        let name = registry.constant("ParamName", "AppParam");
        let tag = registry.parameter_token("ImageTag", &name);
        let image = registry.create_token("ImageName", {
            let tag_marker = tag.marker();
            move || Ok(format!("123.dkr.ecr/app:{tag_marker}"))
        });
        let stack_name = registry.constant("StackName", "DevAppStack");
        let sealed = registry.seal();

        let description = json!({
            "Parameters": { name.marker(): { "Type": "String" } },
            "Image": image.marker(),
            "Tag": tag.marker(),
            "Name": format!("{}-service", stack_name.marker()),
            "Port": 80
        });
        let rendered = sealed.synthesis_pass().render(&description).unwrap();

        assert_eq!(
            rendered,
            json!({
                "Parameters": { "AppParam": { "Type": "String" } },
                "Image": { "Fn::Join": ["", ["123.dkr.ecr/app:", { "Ref": "AppParam" }]] },
                "Tag": { "Ref": "AppParam" },
                "Name": "DevAppStack-service",
                "Port": 80
            })
        );
    }

    #[test]
    fn test_render_in_execution_pass_substitutes_values() {
        let mut registry = TokenRegistry::new();
        let name = registry.constant("ParamName", "AppParam");
        let tag = registry.parameter_token("ImageTag", &name);
        let sealed = registry.seal();

        let bindings = BTreeMap::from([("AppParam".to_string(), "abc123".to_string())]);
        let rendered = sealed
            .execution_pass(bindings)
            .render(&json!({"Image": format!("repo:{}", tag.marker())}))
            .unwrap();

        assert_eq!(rendered, json!({"Image": "repo:abc123"}));
    }

    #[test]
    fn test_object_keys_cannot_be_parameter_refs() {
        let mut registry = TokenRegistry::new();
        let name = registry.constant("ParamName", "AppParam");
        let tag = registry.parameter_token("ImageTag", &name);
        let sealed = registry.seal();

        let result = sealed.synthesis_pass().render(&json!({ tag.marker(): 1 }));
        assert!(matches!(result, Err(DescriptionGenerationError::PrematureResolution { .. })));
    }

    #[test]
    fn test_unknown_marker_is_rejected() {
        let mut other = TokenRegistry::new();
        let foreign = other.constant("Foreign", "x");
        let sealed = TokenRegistry::new().seal();

        let result = sealed.synthesis_pass().resolve_str(&format!("a{}b", foreign.marker()));
        assert!(matches!(result, Err(DescriptionGenerationError::UnknownToken { .. })));
    }

    #[test]
    fn test_self_referencing_token_is_a_cycle() {
        let slot: LateBound<String> = LateBound::new("self");
        let reader = slot.clone();
        let mut registry = TokenRegistry::new();
        let token = registry.create_token("Loop", move || reader.get());
        slot.assign(token.marker()).unwrap();
        let sealed = registry.seal();

        let err = sealed.synthesis_pass().resolve(&token).unwrap_err();
        assert!(matches!(err, DescriptionGenerationError::TokenCycle { chain } if chain == vec!["Loop", "Loop"]));
    }

    #[test]
    fn test_strings_without_markers_are_untouched() {
        let sealed = TokenRegistry::new().seal();
        let pass = sealed.synthesis_pass();

        assert_eq!(pass.resolve_str("plain ${not a token}").unwrap(), "plain ${not a token}");
        assert_eq!(pass.render(&json!(["", true, null])).unwrap(), json!(["", true, null]));
    }
}
