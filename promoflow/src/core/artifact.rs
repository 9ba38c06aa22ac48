//! Named artifacts passed between actions.

use crate::errors::ArtifactError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single file inside an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum ArtifactFile {
    /// Structured JSON content.
    Json(serde_json::Value),
    /// Opaque text content (rendered descriptions, logs).
    Text(String),
}

impl ArtifactFile {
    /// Returns the file content as text.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

/// A named bundle of files produced by exactly one action.
///
/// Artifacts are immutable once the producing action completes; readers
/// receive clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// The artifact name, unique within a pipeline.
    pub name: String,

    /// The producing action as `Stage/Action`. Set by the engine on commit.
    #[serde(default)]
    pub producer: String,

    /// Files keyed by relative path.
    #[serde(default)]
    pub files: BTreeMap<String, ArtifactFile>,

    /// Lineage and provenance metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// When the artifact was created (ISO 8601).
    pub created_at: String,
}

impl Artifact {
    /// Creates an empty artifact.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            producer: String::new(),
            files: BTreeMap::new(),
            metadata: BTreeMap::new(),
            created_at: crate::utils::iso_timestamp(),
        }
    }

    /// Adds a JSON file.
    #[must_use]
    pub fn with_json(mut self, path: impl Into<String>, value: serde_json::Value) -> Self {
        self.files.insert(path.into(), ArtifactFile::Json(value));
        self
    }

    /// Adds a text file.
    #[must_use]
    pub fn with_text(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.files.insert(path.into(), ArtifactFile::Text(text.into()));
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns a file by path.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<&ArtifactFile> {
        self.files.get(path)
    }

    /// Reads a scalar field out of a JSON file.
    ///
    /// `field` is a dot-separated path (`imageTag`, `build.revision`). Text
    /// files are parsed as JSON on demand. Strings are returned verbatim;
    /// numbers and booleans are rendered with their JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, is not JSON, or the path
    /// does not lead to a scalar.
    pub fn json_field(&self, file: &str, field: &str) -> Result<String, ArtifactError> {
        let parsed;
        let root = match self.files.get(file) {
            Some(ArtifactFile::Json(value)) => value,
            Some(ArtifactFile::Text(text)) => {
                parsed = serde_json::from_str::<serde_json::Value>(text).map_err(|e| {
                    ArtifactError::NotJson {
                        artifact: self.name.clone(),
                        file: file.to_string(),
                        message: e.to_string(),
                    }
                })?;
                &parsed
            }
            None => {
                return Err(ArtifactError::FileNotFound {
                    artifact: self.name.clone(),
                    file: file.to_string(),
                })
            }
        };

        let not_found = || ArtifactError::FieldNotFound {
            artifact: self.name.clone(),
            file: file.to_string(),
            field: field.to_string(),
        };

        let mut current = root;
        for segment in field.split('.') {
            current = current.get(segment).ok_or_else(not_found)?;
        }

        match current {
            serde_json::Value::String(s) => Ok(s.clone()),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            serde_json::Value::Bool(b) => Ok(b.to_string()),
            _ => Err(not_found()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_artifact_creation() {
        let artifact = Artifact::new("ImageBuildOutput")
            .with_json("imageTag.json", json!({"imageTag": "abc123"}))
            .with_metadata("environment", json!("dev"));

        assert_eq!(artifact.name, "ImageBuildOutput");
        assert!(artifact.producer.is_empty());
        assert_eq!(artifact.files.len(), 1);
        assert_eq!(artifact.metadata.get("environment"), Some(&json!("dev")));
    }

    #[test]
    fn test_json_field_reads_top_level_string() {
        let artifact =
            Artifact::new("Out").with_json("imageTag.json", json!({"imageTag": "abc123"}));

        assert_eq!(artifact.json_field("imageTag.json", "imageTag").unwrap(), "abc123");
    }

    #[test]
    fn test_json_field_reads_nested_and_text_files() {
        let artifact = Artifact::new("Out")
            .with_text("meta.json", r#"{"build": {"number": 42}}"#);

        assert_eq!(artifact.json_field("meta.json", "build.number").unwrap(), "42");
    }

    #[test]
    fn test_json_field_errors() {
        let artifact = Artifact::new("Out")
            .with_json("a.json", json!({"nested": {"x": 1}}))
            .with_text("b.txt", "not json");

        assert!(matches!(
            artifact.json_field("missing.json", "x"),
            Err(ArtifactError::FileNotFound { .. })
        ));
        assert!(matches!(
            artifact.json_field("b.txt", "x"),
            Err(ArtifactError::NotJson { .. })
        ));
        assert!(matches!(
            artifact.json_field("a.json", "nested"),
            Err(ArtifactError::FieldNotFound { .. })
        ));
        assert!(matches!(
            artifact.json_field("a.json", "nested.y"),
            Err(ArtifactError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn test_artifact_serialization() {
        let artifact = Artifact::new("Out").with_text("App.template.json", "{}");

        let json = serde_json::to_string(&artifact).unwrap();
        let deserialized: Artifact = serde_json::from_str(&json).unwrap();

        assert_eq!(artifact, deserialized);
    }
}
