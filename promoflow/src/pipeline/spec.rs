//! Stage and action specifications.

use super::action::Action;
use crate::core::ActionKind;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Specification for a single action in a stage.
#[derive(Debug, Clone)]
pub struct ActionSpec {
    /// The action name, unique within its stage.
    pub name: String,
    /// The action implementation.
    pub runner: Arc<dyn Action>,
    /// Names of artifacts this action reads.
    pub inputs: Vec<String>,
    /// Names of artifacts this action produces.
    pub outputs: Vec<String>,
    /// Sub-ordering within the stage; lower orders finish first.
    pub run_order: u32,
    /// The kind of action.
    pub kind: ActionKind,
}

impl ActionSpec {
    /// Creates a new action specification with run order 1.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Action>) -> Self {
        Self {
            name: name.into(),
            runner,
            inputs: Vec::new(),
            outputs: Vec::new(),
            run_order: 1,
            kind: ActionKind::default(),
        }
    }

    /// Adds an input artifact.
    #[must_use]
    pub fn with_input(mut self, artifact: impl Into<String>) -> Self {
        self.inputs.push(artifact.into());
        self
    }

    /// Sets the input artifacts.
    #[must_use]
    pub fn with_inputs(mut self, artifacts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inputs = artifacts.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an output artifact.
    #[must_use]
    pub fn with_output(mut self, artifact: impl Into<String>) -> Self {
        self.outputs.push(artifact.into());
        self
    }

    /// Sets the output artifacts.
    #[must_use]
    pub fn with_outputs(mut self, artifacts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outputs = artifacts.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the run order.
    #[must_use]
    pub fn with_run_order(mut self, run_order: u32) -> Self {
        self.run_order = run_order;
        self
    }

    /// Sets the action kind.
    #[must_use]
    pub fn with_kind(mut self, kind: ActionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns the `Stage/Action` path used in diagnostics and artifact provenance.
    #[must_use]
    pub fn path(&self, stage: &str) -> String {
        format!("{stage}/{}", self.name)
    }

    /// Validates the action specification in the context of its stage.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty name, a zero run order, or an artifact
    /// listed twice on the same side.
    pub fn validate(&self, stage: &str) -> Result<(), PipelineValidationError> {
        let path = self.path(stage);
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Stage '{stage}' contains an action with an empty name"
            ))
            .with_involved(vec![stage.to_string()]));
        }
        if self.run_order == 0 {
            return Err(PipelineValidationError::new(format!(
                "Action '{path}' has run order 0; run orders start at 1"
            ))
            .with_involved(vec![path.clone()])
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-RUN_ORDER", "Run order must be at least 1")
                    .with_context_entry("action", path),
            ));
        }
        for (side, names) in [("input", &self.inputs), ("output", &self.outputs)] {
            let mut seen = HashSet::new();
            if let Some(dup) = names.iter().find(|n| !seen.insert(n.as_str())) {
                return Err(PipelineValidationError::new(format!(
                    "Action '{path}' lists {side} artifact '{dup}' twice"
                ))
                .with_involved(vec![path]));
            }
        }
        Ok(())
    }
}

/// Specification for a stage: a named set of actions.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The actions in declaration order.
    pub actions: Vec<ActionSpec>,
}

impl StageSpec {
    /// Creates an empty stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    /// Adds an action.
    #[must_use]
    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    /// Returns the action with the given name.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Groups actions by run order, ascending.
    #[must_use]
    pub fn run_order_groups(&self) -> BTreeMap<u32, Vec<&ActionSpec>> {
        let mut groups: BTreeMap<u32, Vec<&ActionSpec>> = BTreeMap::new();
        for action in &self.actions {
            groups.entry(action.run_order).or_default().push(action);
        }
        groups
    }

    /// Validates the stage and each of its actions.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is empty or action names repeat.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name cannot be empty"));
        }
        if self.actions.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' has no actions",
                self.name
            ))
            .with_involved(vec![self.name.clone()])
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-EMPTY", "A stage needs at least one action")
                    .with_context_entry("stage", self.name.clone()),
            ));
        }

        let mut names = HashSet::new();
        for action in &self.actions {
            action.validate(&self.name)?;
            if !names.insert(action.name.as_str()) {
                let path = action.path(&self.name);
                return Err(PipelineValidationError::new(format!(
                    "Duplicate action name '{}' in stage '{}'",
                    action.name, self.name
                ))
                .with_involved(vec![path.clone()])
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-DUP_ACTION", "Action names must be unique within a stage")
                        .with_context_entry("action", path),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAction;

    fn action(name: &str) -> ActionSpec {
        ActionSpec::new(name, Arc::new(ScriptedAction::succeeding(name)))
    }

    #[test]
    fn test_action_spec_builders() {
        let spec = action("CFN_Deploy")
            .with_input("DevDescriptions")
            .with_input("ImageBuildOutput")
            .with_run_order(2)
            .with_kind(ActionKind::Deploy);

        assert_eq!(spec.inputs, vec!["DevDescriptions", "ImageBuildOutput"]);
        assert_eq!(spec.run_order, 2);
        assert_eq!(spec.kind, ActionKind::Deploy);
        assert_eq!(spec.path("Deploy"), "Deploy/CFN_Deploy");
    }

    #[test]
    fn test_run_order_zero_is_rejected() {
        let err = action("Gate").with_run_order(0).validate("DeployStaging").unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-RUN_ORDER"));
    }

    #[test]
    fn test_duplicate_output_is_rejected() {
        let err = action("Build")
            .with_outputs(["Out", "Out"])
            .validate("Build")
            .unwrap_err();
        assert!(err.message.contains("twice"));
    }

    #[test]
    fn test_empty_stage_is_rejected() {
        let err = StageSpec::new("Deploy").validate().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-EMPTY"));
        assert_eq!(err.involved, vec!["Deploy"]);
    }

    #[test]
    fn test_duplicate_action_is_rejected() {
        let stage = StageSpec::new("Build")
            .with_action(action("Synth"))
            .with_action(action("Synth"));
        let err = stage.validate().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-DUP_ACTION"));
    }

    #[test]
    fn test_run_order_groups_ascend() {
        let stage = StageSpec::new("DeployStaging")
            .with_action(action("Gate").with_run_order(2))
            .with_action(action("Deploy"))
            .with_action(action("Smoke").with_run_order(2));
        let groups = stage.run_order_groups();
        let orders: Vec<u32> = groups.keys().copied().collect();

        assert_eq!(orders, vec![1, 2]);
        assert_eq!(groups[&2].len(), 2);
        assert_eq!(stage.action("Deploy").map(|a| a.run_order), Some(1));
    }
}
