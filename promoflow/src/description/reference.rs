//! Artifact references: deferred identities of built images.

use crate::errors::DescriptionGenerationError;
use crate::tokens::{DeferredToken, LateBound, TokenRegistry};
use crate::utils::{logical_id, sha256_hex};
use serde::{Deserialize, Serialize};

/// An image repository in the artifact registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRepository {
    /// Short name, e.g. `app` or `nginx`.
    pub name: String,
    /// Registry URI without tag.
    pub uri: String,
}

impl ImageRepository {
    /// Creates a new repository.
    #[must_use]
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }
}

/// An image whose tag is not known until the pipeline runs.
///
/// One reference exists per repository per role (`dev`, `staging`, `prod`).
/// Its deployment parameter is named lazily: the logical id is assigned when
/// the reference is [`bind`](Self::bind)ed into a description, so both
/// [`parameter_name`](Self::parameter_name) and
/// [`image_name`](Self::image_name) are deferred tokens.
#[derive(Debug, Clone)]
pub struct ArtifactReference {
    repository: ImageRepository,
    role: String,
    parameter_id: LateBound<String>,
    parameter_name: DeferredToken,
    tag: DeferredToken,
    image_name: DeferredToken,
}

impl ArtifactReference {
    /// Creates the reference's tokens in `registry`.
    pub fn new(registry: &mut TokenRegistry, repository: ImageRepository, role: &str) -> Self {
        let label = format!("{}-{}", repository.name, role);
        let parameter_id: LateBound<String> = LateBound::new(format!("{label}.parameterId"));

        let reader = parameter_id.clone();
        let parameter_name =
            registry.create_token(&format!("{label}/ParameterName"), move || reader.get());
        let tag = registry.parameter_token(&format!("{label}/ImageTag"), &parameter_name);

        let image = format!("{}:{}", repository.uri, tag.marker());
        let image_name =
            registry.create_token(&format!("{label}/ImageName"), move || Ok(image.clone()));

        Self {
            repository,
            role: role.to_string(),
            parameter_id,
            parameter_name,
            tag,
            image_name,
        }
    }

    /// Returns the repository.
    #[must_use]
    pub fn repository(&self) -> &ImageRepository {
        &self.repository
    }

    /// Returns the promotion role.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Returns the token for the deployment parameter's logical id.
    #[must_use]
    pub fn parameter_name(&self) -> &DeferredToken {
        &self.parameter_name
    }

    /// Returns the execution-time image tag token.
    #[must_use]
    pub fn tag(&self) -> &DeferredToken {
        &self.tag
    }

    /// Returns the `uri:tag` token.
    #[must_use]
    pub fn image_name(&self) -> &DeferredToken {
        &self.image_name
    }

    /// Returns true once the reference has been bound into a description.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.parameter_id.is_bound()
    }

    /// Assigns the parameter logical id derived from the binding `path`.
    ///
    /// The id is `<Repository>PipelineParam<HASH>` where `HASH` is the first
    /// eight hex digits of the SHA-256 of `path`, so the same binding path
    /// always yields the same id.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyBound` if the reference is already bound.
    pub fn bind(&self, path: &str) -> Result<String, DescriptionGenerationError> {
        let digest = sha256_hex(path);
        let id = format!(
            "{}PipelineParam{}",
            logical_id(&self.repository.name),
            digest[..8].to_ascii_uppercase()
        );
        self.parameter_id.assign(id.clone())?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::Availability;
    use std::collections::BTreeMap;

    fn app() -> ImageRepository {
        ImageRepository::new("app", "123456789012.dkr.ecr.us-east-1.amazonaws.com/app")
    }

    #[test]
    fn test_reference_tokens_have_expected_availability() {
        let mut registry = TokenRegistry::new();
        let reference = ArtifactReference::new(&mut registry, app(), "staging");

        assert_eq!(reference.parameter_name().availability(), Availability::Synthesis);
        assert_eq!(reference.image_name().availability(), Availability::Synthesis);
        assert_eq!(reference.tag().availability(), Availability::Execution);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_unbound_reference_reports_missing_parameter_id() {
        let mut registry = TokenRegistry::new();
        let reference = ArtifactReference::new(&mut registry, app(), "prod");
        let sealed = registry.seal();

        let err = sealed
            .synthesis_pass()
            .resolve(reference.parameter_name())
            .unwrap_err();
        match err {
            DescriptionGenerationError::UnresolvedDependency(e) => {
                assert_eq!(e.dependency, "app-prod.parameterId");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bind_is_deterministic_and_write_once() {
        let mut registry = TokenRegistry::new();
        let first = ArtifactReference::new(&mut registry, app(), "dev");
        let second = ArtifactReference::new(&mut registry, app(), "dev");

        let id = first.bind("DevAppStack/app").unwrap();
        assert_eq!(id, second.bind("DevAppStack/app").unwrap());
        assert!(id.starts_with("appPipelineParam"));
        assert_eq!(id.len(), "appPipelineParam".len() + 8);
        assert!(first.bind("Other/app").is_err());
    }

    #[test]
    fn test_bound_reference_resolves_at_execution() {
        let mut registry = TokenRegistry::new();
        let reference = ArtifactReference::new(&mut registry, app(), "dev");
        let id = reference.bind("DevAppStack/app").unwrap();
        let sealed = registry.seal();

        assert_eq!(sealed.synthesis_pass().resolve(reference.parameter_name()).unwrap(), id);

        let pass = sealed.execution_pass(BTreeMap::from([(id, "abc123".to_string())]));
        assert_eq!(
            pass.resolve(reference.image_name()).unwrap(),
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/app:abc123"
        );
    }
}
