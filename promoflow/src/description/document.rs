//! Rendered infrastructure descriptions.

use super::overrides::ParameterName;
use crate::errors::DescriptionGenerationError;
use crate::utils::sha256_hex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Output format of a description file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionFormat {
    /// Pretty-printed JSON.
    #[default]
    Json,
    /// YAML.
    Yaml,
}

impl DescriptionFormat {
    /// Returns the file extension.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

impl fmt::Display for DescriptionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A fully synthesized description for one environment stack.
///
/// The body contains no token markers. Execution-time values appear only as
/// `Ref` / `Fn::Join` nodes naming declared parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    /// The environment stack name.
    pub stack_name: String,
    /// The environment tag (`dev`, `staging`, `prod`).
    pub environment: String,
    /// The file format.
    pub format: DescriptionFormat,
    /// Declared deployment parameters.
    pub parameters: BTreeSet<ParameterName>,
    /// The description tree.
    pub body: Value,
}

impl Description {
    /// Returns `<Stack>.template.<json|yaml>`.
    #[must_use]
    pub fn file_name(&self) -> String {
        Self::file_name_for(&self.stack_name, self.format)
    }

    /// Returns the description file name for a stack and format.
    #[must_use]
    pub fn file_name_for(stack_name: &str, format: DescriptionFormat) -> String {
        format!("{stack_name}.template.{}", format.extension())
    }

    /// Returns true if the description declares `name`.
    #[must_use]
    pub fn declares(&self, name: &ParameterName) -> bool {
        self.parameters.contains(name)
    }

    /// Renders the body in the description's format.
    ///
    /// # Errors
    ///
    /// Returns `Render` if serialization fails.
    pub fn render(&self) -> Result<String, DescriptionGenerationError> {
        let render_err = |message: String| DescriptionGenerationError::Render {
            stack: self.stack_name.clone(),
            message,
        };
        match self.format {
            DescriptionFormat::Json => {
                serde_json::to_string_pretty(&self.body).map_err(|e| render_err(e.to_string()))
            }
            DescriptionFormat::Yaml => {
                serde_yaml::to_string(&self.body).map_err(|e| render_err(e.to_string()))
            }
        }
    }

    /// Returns the SHA-256 hex digest of the rendered description.
    ///
    /// # Errors
    ///
    /// Returns `Render` if serialization fails.
    pub fn digest(&self) -> Result<String, DescriptionGenerationError> {
        Ok(sha256_hex(self.render()?))
    }

    /// Parses rendered description text back into a tree.
    ///
    /// # Errors
    ///
    /// Returns `Render` if the text is not valid in `format`.
    pub fn parse(
        stack_name: &str,
        format: DescriptionFormat,
        text: &str,
    ) -> Result<Value, DescriptionGenerationError> {
        let parse_err = |message: String| DescriptionGenerationError::Render {
            stack: stack_name.to_string(),
            message,
        };
        match format {
            DescriptionFormat::Json => serde_json::from_str(text).map_err(|e| parse_err(e.to_string())),
            DescriptionFormat::Yaml => serde_yaml::from_str(text).map_err(|e| parse_err(e.to_string())),
        }
    }
}

/// Substitutes deployment parameter values into a synthesized description.
///
/// Replaces `{"Ref": name}` with the bound value and collapses
/// `{"Fn::Join": [sep, parts]}` once every part is a string. This is what a
/// provisioning engine does when it applies a description.
///
/// # Errors
///
/// Returns `UnboundParameter` for a `Ref` with no value.
pub fn apply_parameters(
    template: &Value,
    parameters: &BTreeMap<String, String>,
) -> Result<Value, DescriptionGenerationError> {
    match template {
        Value::Object(map) if map.len() == 1 => {
            if let Some(Value::String(name)) = map.get("Ref") {
                return parameters
                    .get(name)
                    .map(|value| Value::String(value.clone()))
                    .ok_or_else(|| DescriptionGenerationError::UnboundParameter {
                        parameter: name.clone(),
                    });
            }
            if let Some(Value::Array(join)) = map.get("Fn::Join") {
                if let [Value::String(separator), Value::Array(parts)] = join.as_slice() {
                    let applied = parts
                        .iter()
                        .map(|part| apply_parameters(part, parameters))
                        .collect::<Result<Vec<_>, _>>()?;
                    if let Some(strings) = applied
                        .iter()
                        .map(Value::as_str)
                        .collect::<Option<Vec<_>>>()
                    {
                        return Ok(Value::String(strings.join(separator.as_str())));
                    }
                }
            }
            apply_object(map, parameters)
        }
        Value::Object(map) => apply_object(map, parameters),
        Value::Array(items) => items
            .iter()
            .map(|item| apply_parameters(item, parameters))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn apply_object(
    map: &serde_json::Map<String, Value>,
    parameters: &BTreeMap<String, String>,
) -> Result<Value, DescriptionGenerationError> {
    let mut applied = serde_json::Map::with_capacity(map.len());
    for (key, item) in map {
        applied.insert(key.clone(), apply_parameters(item, parameters)?);
    }
    Ok(Value::Object(applied))
}
