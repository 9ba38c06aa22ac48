//! Deferred value resolution.
//!
//! Resolution is split into two phases:
//!
//! 1. **Description phase**: a [`TokenRegistry`] creates [`DeferredToken`]s
//!    whose producers may read [`LateBound`] slots assigned later in the same
//!    phase. Nothing can be resolved here.
//! 2. **Resolution phase**: [`TokenRegistry::seal`] yields a
//!    [`SealedRegistry`], from which [`ResolutionPass`]es are taken. A pass is
//!    tagged with its phase ([`Synthesis`] or [`Execution`]) and refuses to
//!    evaluate tokens that are not yet available.
//!
//! Tokens embed into description trees (`serde_json::Value`) as marker
//! strings; [`ResolutionPass::render`] substitutes them in one walk.

mod pass;
mod registry;
mod token;

pub use pass::{Execution, Phase, ResolutionPass, Synthesis};
pub use registry::{SealedRegistry, TokenRegistry};
pub use token::{Availability, DeferredToken, LateBound, MissingDependency};

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
pub(crate) static MARKER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{Token\[([^\]]+)\]\}").expect("Invalid marker pattern"));

/// Returns true if `text` contains at least one token marker.
#[must_use]
pub fn contains_marker(text: &str) -> bool {
    MARKER_PATTERN.is_match(text)
}

/// Returns true if any string or key in the tree contains a token marker.
#[must_use]
pub fn has_markers(value: &Value) -> bool {
    match value {
        Value::String(text) => contains_marker(text),
        Value::Array(items) => items.iter().any(has_markers),
        Value::Object(map) => map
            .iter()
            .any(|(key, item)| contains_marker(key) || has_markers(item)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_has_markers_walks_keys_and_values() {
        let mut registry = TokenRegistry::new();
        let token = registry.constant("Name", "x");

        assert!(has_markers(&json!({ "a": [1, token.marker()] })));
        assert!(has_markers(&json!({ token.marker(): null })));
        assert!(!has_markers(&json!({ "a": ["${Token}", 2] })));
    }

    #[test]
    fn test_render_leaves_no_markers() {
        let mut registry = TokenRegistry::new();
        let stack = registry.constant("Stack", "StagingAppStack");
        let description = json!({ "Description": format!("{} service", stack.marker()) });
        let sealed = registry.seal();

        let rendered = sealed.synthesis_pass().render(&description).unwrap();
        assert!(!has_markers(&rendered));
        assert_eq!(rendered["Description"], "StagingAppStack service");
    }
}
