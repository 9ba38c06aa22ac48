//! Error types for the promoflow orchestrator.
//!
//! The taxonomy separates failures by when they happen and who owns them:
//! description generation (before any deploy), action execution, bridge
//! access, and approval gating.

use crate::tokens::Availability;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for promoflow operations.
#[derive(Debug, Error)]
pub enum PromoflowError {
    /// Description generation failed (graph validation, tokens, overrides).
    #[error("{0}")]
    Description(#[from] DescriptionGenerationError),

    /// An action's underlying work failed.
    #[error("{0}")]
    Action(#[from] ActionExecutionError),

    /// The cross-boundary parameter bridge could not serve a request.
    #[error("{0}")]
    Bridge(#[from] BridgeError),

    /// An approval gate halted the pipeline.
    #[error("{0}")]
    Approval(#[from] ApprovalError),

    /// Release configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The pipeline refused to start for the given trigger.
    #[error("Pipeline '{pipeline}' refused trigger: {reason}")]
    TriggerRefused {
        /// The pipeline name.
        pipeline: String,
        /// Why the trigger was refused.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PipelineValidationError> for PromoflowError {
    fn from(err: PipelineValidationError) -> Self {
        Self::Description(DescriptionGenerationError::Validation(err))
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-FORWARD_REF").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when stage graph validation fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages or actions involved in the error.
    pub involved: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            involved: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages or actions involved.
    #[must_use]
    pub fn with_involved(mut self, involved: Vec<String>) -> Self {
        self.involved = involved;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when artifact flow between actions forms a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of actions forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "CONTRACT-004-CYCLE",
            format!("Artifact flow contains a cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("An action cannot consume an artifact that is derived from its own output.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            involved: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// A token's producer depends on a value that was never assigned.
///
/// `chain` lists the tokens being resolved, outermost first, ending with
/// the token whose producer hit the missing dependency.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unresolved dependency: token '{token}' needs '{dependency}' which has not been assigned (chain: {})", .chain.join(" -> "))]
pub struct UnresolvedDependencyError {
    /// The token whose producer failed.
    pub token: String,
    /// The missing dependency.
    pub dependency: String,
    /// Resolution chain leading to the failure.
    pub chain: Vec<String>,
}

impl UnresolvedDependencyError {
    /// Creates a new unresolved dependency error.
    #[must_use]
    pub fn new(token: impl Into<String>, dependency: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            chain: vec![token.clone()],
            token,
            dependency: dependency.into(),
        }
    }

    /// Sets the resolution chain.
    #[must_use]
    pub fn with_chain(mut self, chain: Vec<String>) -> Self {
        self.chain = chain;
        self
    }
}

/// Errors raised while building or rendering infrastructure descriptions.
///
/// All of these are build-time defects: they halt before any deploy runs.
#[derive(Debug, Clone, Error)]
pub enum DescriptionGenerationError {
    /// The stage graph is structurally invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A token producer depends on an unassigned value.
    #[error("{0}")]
    UnresolvedDependency(#[from] UnresolvedDependencyError),

    /// A token was evaluated before its availability point.
    #[error("Token '{token}' is only available at {available_at} time and cannot be resolved during {attempted_in}")]
    PrematureResolution {
        /// The token label.
        token: String,
        /// When the token becomes available.
        available_at: Availability,
        /// The phase in which resolution was attempted.
        attempted_in: Availability,
    },

    /// A placeholder marker references a token this registry never created.
    #[error("Unknown token marker '{marker}'")]
    UnknownToken {
        /// The marker text.
        marker: String,
    },

    /// A token resolves (directly or indirectly) to itself.
    #[error("Token cycle: {}", .chain.join(" -> "))]
    TokenCycle {
        /// The tokens forming the cycle.
        chain: Vec<String>,
    },

    /// A late-bound slot was assigned twice.
    #[error("'{slot}' is already bound")]
    AlreadyBound {
        /// The slot name.
        slot: String,
    },

    /// An execution-time parameter has no bound value.
    #[error("Deployment parameter '{parameter}' has no bound value")]
    UnboundParameter {
        /// The parameter name.
        parameter: String,
    },

    /// A parameter override names a parameter the description does not declare.
    #[error("Stack '{stack}' does not declare deployment parameter '{parameter}'")]
    InvalidOverride {
        /// The stack name.
        stack: String,
        /// The parameter name.
        parameter: String,
    },

    /// A requested stack is not part of the blueprint.
    #[error("Unknown environment stack '{stack}'")]
    UnknownStack {
        /// The stack name.
        stack: String,
    },

    /// Rendering to the output format failed.
    #[error("Failed to render '{stack}': {message}")]
    Render {
        /// The stack name.
        stack: String,
        /// The renderer's message.
        message: String,
    },
}

/// An action's underlying work failed.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Action '{action}' in stage '{stage}' failed: {message}")]
pub struct ActionExecutionError {
    /// The owning stage.
    pub stage: String,
    /// The failing action.
    pub action: String,
    /// What went wrong.
    pub message: String,
}

impl ActionExecutionError {
    /// Creates a new action execution error.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            action: action.into(),
            message: message.into(),
        }
    }
}

/// Error raised when an action reads an artifact it did not declare.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Undeclared input: action '{action}' attempted to read artifact '{artifact}' which was not declared as an input")]
pub struct UndeclaredArtifactError {
    /// The action attempting access.
    pub action: String,
    /// The undeclared artifact.
    pub artifact: String,
}

impl UndeclaredArtifactError {
    /// Creates a new undeclared artifact error.
    #[must_use]
    pub fn new(action: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            artifact: artifact.into(),
        }
    }
}

/// Errors reading values out of an artifact.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArtifactError {
    /// The file does not exist in the artifact.
    #[error("Artifact '{artifact}' has no file '{file}'")]
    FileNotFound {
        /// The artifact name.
        artifact: String,
        /// The file path.
        file: String,
    },

    /// The file is not JSON.
    #[error("File '{file}' in artifact '{artifact}' is not valid JSON: {message}")]
    NotJson {
        /// The artifact name.
        artifact: String,
        /// The file path.
        file: String,
        /// Parser message.
        message: String,
    },

    /// The field path does not lead to a scalar value.
    #[error("Field '{field}' not found in '{file}' of artifact '{artifact}'")]
    FieldNotFound {
        /// The artifact name.
        artifact: String,
        /// The file path.
        file: String,
        /// The field path.
        field: String,
    },
}

/// Bridge access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeAccess {
    /// Permission to read keys.
    Read,
    /// Permission to write keys.
    Write,
}

impl std::fmt::Display for BridgeAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Errors from the cross-boundary parameter bridge.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The key was never written.
    #[error("Bridge key '{key}' not found")]
    NotFound {
        /// The key.
        key: String,
    },

    /// The caller holds no grant covering the key for this access.
    #[error("Principal '{principal}' has no {access} permission for bridge key '{key}'")]
    PermissionDenied {
        /// The caller.
        principal: String,
        /// The key.
        key: String,
        /// The requested access.
        access: BridgeAccess,
    },

    /// A grant was declared with an unusable prefix.
    #[error("Invalid bridge grant prefix '{prefix}': grants must be scoped to a non-empty key prefix")]
    InvalidGrant {
        /// The rejected prefix.
        prefix: String,
    },

    /// The store could not be reached or failed mid-operation.
    #[error("Bridge unavailable for key '{key}': {reason}")]
    Unavailable {
        /// The key.
        key: String,
        /// Underlying failure.
        reason: String,
    },
}

impl BridgeError {
    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Terminal outcomes of an approval gate other than approval.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApprovalError {
    /// A reviewer rejected the promotion.
    #[error("Approval '{gate}' rejected by {reviewer}{}", .comment.as_ref().map(|c| format!(": {c}")).unwrap_or_default())]
    Rejected {
        /// The gate name.
        gate: String,
        /// Who rejected.
        reviewer: String,
        /// Optional reviewer comment.
        comment: Option<String>,
    },

    /// No decision arrived before the timeout.
    #[error("Approval '{gate}' expired after {timeout_ms}ms")]
    Expired {
        /// The gate name.
        gate: String,
        /// The timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The pending request was withdrawn without a decision.
    #[error("Approval '{gate}' was cancelled")]
    Cancelled {
        /// The gate name.
        gate: String,
    },
}

/// A decision arrived for a gate that is not waiting for one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("No pending approval '{gate}' for execution {execution_id}")]
pub struct ApprovalDecisionError {
    /// The execution the decision was addressed to.
    pub execution_id: String,
    /// The gate name.
    pub gate: String,
}

impl ApprovalDecisionError {
    /// Creates a new decision error.
    #[must_use]
    pub fn new(execution_id: impl Into<String>, gate: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            gate: gate.into(),
        }
    }
}

/// Reviewers could not be notified of a pending approval.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to notify reviewers of '{gate}': {message}")]
pub struct NotifyError {
    /// The gate name.
    pub gate: String,
    /// What went wrong.
    pub message: String,
}

impl NotifyError {
    /// Creates a new notification error.
    #[must_use]
    pub fn new(gate: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            message: message.into(),
        }
    }
}

/// An external collaborator (source host, image registry, provisioning
/// engine) reported a failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    /// Which collaborator failed.
    pub collaborator: String,
    /// What it reported.
    pub message: String,
}

impl CollaboratorError {
    /// Creates a new collaborator error.
    #[must_use]
    pub fn new(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }
}

/// Errors loading or validating release configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration text could not be parsed.
    #[error("Invalid release configuration: {0}")]
    Parse(String),

    /// A field holds an unusable value.
    #[error("Invalid release configuration field '{field}': {message}")]
    Invalid {
        /// The field name.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    /// Creates an invalid-field error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Provides default suggestions for stage graph contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "CONTRACT-004-CYCLE" => Some(
                "Check which actions consume each other's artifacts. \
                 Artifacts must flow from earlier stages to later ones.",
            ),
            "CONTRACT-004-FORWARD_REF" => Some(
                "Move the producing action to an earlier stage, or give it a lower \
                 runOrder than the consumer within the same stage.",
            ),
            "CONTRACT-004-MISSING_ARTIFACT" => Some(
                "Declare the artifact as an output of an earlier action. \
                 Check for typos in artifact names.",
            ),
            "CONTRACT-004-DUP_ARTIFACT" => Some(
                "Each artifact has exactly one producer. Rename one of the outputs.",
            ),
            "CONTRACT-004-DUP_STAGE" => Some("Stage names must be unique within a pipeline."),
            "CONTRACT-004-DUP_ACTION" => Some("Action names must be unique within a stage."),
            "CONTRACT-004-EMPTY" => Some("Add at least one stage, and one action per stage."),
            "CONTRACT-004-RUN_ORDER" => Some("runOrder values start at 1."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "Build");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"Build".to_string()));
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "Build/a".to_string(),
            "Build/b".to_string(),
            "Build/a".to_string(),
        ]);

        assert!(err.to_string().contains("Build/a -> Build/b -> Build/a"));
        assert_eq!(err.error_info.code, "CONTRACT-004-CYCLE");

        let validation: PipelineValidationError = err.into();
        assert_eq!(validation.code(), Some("CONTRACT-004-CYCLE"));
        assert_eq!(validation.involved.len(), 3);
    }

    #[test]
    fn test_unresolved_dependency_reports_chain() {
        let err = UnresolvedDependencyError::new("paramName.2", "DevAppStack/app logical id")
            .with_chain(vec!["imageName.4".to_string(), "paramName.2".to_string()]);

        let msg = err.to_string();
        assert!(msg.contains("paramName.2"));
        assert!(msg.contains("imageName.4 -> paramName.2"));
    }

    #[test]
    fn test_approval_error_messages() {
        let rejected = ApprovalError::Rejected {
            gate: "Validation".to_string(),
            reviewer: "qa@example.com".to_string(),
            comment: Some("smoke tests red".to_string()),
        };
        assert_eq!(
            rejected.to_string(),
            "Approval 'Validation' rejected by qa@example.com: smoke tests red"
        );

        let expired = ApprovalError::Expired {
            gate: "Validation".to_string(),
            timeout_ms: 30_000,
        };
        assert!(expired.to_string().contains("expired after 30000ms"));
    }

    #[test]
    fn test_contract_suggestions() {
        assert!(ContractSuggestions::get("CONTRACT-004-FORWARD_REF").is_some());
        assert!(ContractSuggestions::get("CONTRACT-004-CYCLE").is_some());
        assert!(ContractSuggestions::get("UNKNOWN").is_none());
    }

    #[test]
    fn test_validation_error_converts_to_top_level() {
        let err: PromoflowError = PipelineValidationError::new("bad graph").into();
        assert!(matches!(
            err,
            PromoflowError::Description(DescriptionGenerationError::Validation(_))
        ));
    }
}
