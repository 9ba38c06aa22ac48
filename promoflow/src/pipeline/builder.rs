//! Pipeline builder with structural validation.

use super::action::TriggerPolicy;
use super::graph::StageGraph;
use super::spec::{ActionSpec, StageSpec};
use crate::bridge::BridgeGrant;
use crate::errors::{ContractErrorInfo, ContractSuggestions, CycleDetectedError, PipelineValidationError};
use std::collections::{BTreeMap, HashSet};

/// Where an artifact is produced.
#[derive(Debug, Clone)]
struct Producer {
    stage_index: usize,
    run_order: u32,
    path: String,
}

/// Builder for creating validated stage graphs.
///
/// Stage-local checks (names, run orders) happen as stages are added;
/// artifact-flow checks (producers, cycles, forward references) happen in
/// [`PipelineBuilder::build`], before anything can execute.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageSpec>,
    trigger_policy: TriggerPolicy,
    tags: BTreeMap<String, String>,
    grants: Vec<BridgeGrant>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            trigger_policy: TriggerPolicy::default(),
            tags: BTreeMap::new(),
            grants: Vec::new(),
        }
    }

    /// Sets which triggers may start the pipeline.
    #[must_use]
    pub fn with_trigger_policy(mut self, policy: TriggerPolicy) -> Self {
        self.trigger_policy = policy;
        self
    }

    /// Adds a tag (for example `environment = dev`).
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Declares a bridge grant the pipeline's actions hold.
    #[must_use]
    pub fn with_grant(mut self, grant: BridgeGrant) -> Self {
        self.grants.push(grant);
        self
    }

    /// Adds a stage and returns the builder.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid or its name is taken.
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, PipelineValidationError> {
        self.add_stage(spec)?;
        Ok(self)
    }

    /// Adds a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid or its name is taken.
    pub fn add_stage(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        spec.validate()?;

        if self.stages.iter().any(|s| s.name == spec.name) {
            return Err(PipelineValidationError::new(format!(
                "Duplicate stage name '{}'",
                spec.name
            ))
            .with_involved(vec![spec.name.clone()])
            .with_error_info(contract_info(
                "CONTRACT-004-DUP_STAGE",
                format!("Stage '{}' is declared twice", spec.name),
            )));
        }

        self.stages.push(spec);
        Ok(())
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates artifact flow across the whole graph.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found: no stages, an artifact
    /// with two producers, an input nobody produces, a cycle, or an input
    /// produced no earlier than its consumer.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages").with_error_info(
                contract_info("CONTRACT-004-EMPTY", "Cannot build an empty pipeline"),
            ));
        }

        let producers = self.collect_producers()?;

        for stage in &self.stages {
            for action in &stage.actions {
                for input in &action.inputs {
                    if !producers.contains_key(input) {
                        let path = action.path(&stage.name);
                        return Err(PipelineValidationError::new(format!(
                            "Action '{path}' reads artifact '{input}' which no action produces"
                        ))
                        .with_involved(vec![path.clone()])
                        .with_error_info(
                            contract_info(
                                "CONTRACT-004-MISSING_ARTIFACT",
                                format!("Artifact '{input}' has no producer"),
                            )
                            .with_context_entry("action", path)
                            .with_context_entry("artifact", input.clone()),
                        ));
                    }
                }
            }
        }

        self.detect_cycles(&producers)?;
        self.check_ordering(&producers)?;
        Ok(())
    }

    /// Builds the stage graph.
    ///
    /// # Errors
    ///
    /// Returns an error if [`PipelineBuilder::validate`] fails.
    pub fn build(self) -> Result<StageGraph, PipelineValidationError> {
        self.validate()?;
        Ok(StageGraph::new(
            self.name,
            self.stages,
            self.trigger_policy,
            self.tags,
            self.grants,
        ))
    }

    fn collect_producers(&self) -> Result<BTreeMap<String, Producer>, PipelineValidationError> {
        let mut producers: BTreeMap<String, Producer> = BTreeMap::new();
        for (stage_index, stage) in self.stages.iter().enumerate() {
            for action in &stage.actions {
                let path = action.path(&stage.name);
                for output in &action.outputs {
                    if let Some(existing) = producers.get(output) {
                        return Err(PipelineValidationError::new(format!(
                            "Artifact '{output}' is produced by both '{}' and '{path}'",
                            existing.path
                        ))
                        .with_involved(vec![existing.path.clone(), path.clone()])
                        .with_error_info(
                            contract_info(
                                "CONTRACT-004-DUP_ARTIFACT",
                                format!("Artifact '{output}' has more than one producer"),
                            )
                            .with_context_entry("artifact", output.clone()),
                        ));
                    }
                    producers.insert(
                        output.clone(),
                        Producer {
                            stage_index,
                            run_order: action.run_order,
                            path: path.clone(),
                        },
                    );
                }
            }
        }
        Ok(producers)
    }

    fn check_ordering(&self, producers: &BTreeMap<String, Producer>) -> Result<(), PipelineValidationError> {
        for (stage_index, stage) in self.stages.iter().enumerate() {
            for action in &stage.actions {
                for input in &action.inputs {
                    let Some(producer) = producers.get(input) else {
                        continue;
                    };
                    let earlier = producer.stage_index < stage_index
                        || (producer.stage_index == stage_index && producer.run_order < action.run_order);
                    if earlier {
                        continue;
                    }

                    let path = action.path(&stage.name);
                    let summary = if producer.stage_index == stage_index {
                        format!(
                            "'{path}' (runOrder {}) reads '{input}' from '{}' (runOrder {}) in the same stage",
                            action.run_order, producer.path, producer.run_order
                        )
                    } else {
                        format!(
                            "'{path}' reads '{input}' from later stage action '{}'",
                            producer.path
                        )
                    };
                    return Err(PipelineValidationError::new(format!("Forward artifact reference: {summary}"))
                        .with_involved(vec![path.clone(), producer.path.clone()])
                        .with_error_info(
                            contract_info("CONTRACT-004-FORWARD_REF", summary)
                                .with_context_entry("consumer", path)
                                .with_context_entry("producer", producer.path.clone())
                                .with_context_entry("artifact", input.clone()),
                        ));
                }
            }
        }
        Ok(())
    }

    /// Detects cycles in the artifact flow between actions.
    fn detect_cycles(&self, producers: &BTreeMap<String, Producer>) -> Result<(), CycleDetectedError> {
        let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for stage in &self.stages {
            for action in &stage.actions {
                edges.insert(action.path(&stage.name), dependencies(action, producers));
            }
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in edges.keys() {
            if !visited.contains(node) {
                if let Some(cycle) = dfs_cycle(&edges, node, &mut visited, &mut rec_stack, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }

        Ok(())
    }
}

fn contract_info(code: &str, summary: impl Into<String>) -> ContractErrorInfo {
    let info = ContractErrorInfo::new(code, summary);
    match ContractSuggestions::get(code) {
        Some(hint) => info.with_fix_hint(hint),
        None => info,
    }
}

fn dependencies(action: &ActionSpec, producers: &BTreeMap<String, Producer>) -> Vec<String> {
    action
        .inputs
        .iter()
        .filter_map(|input| producers.get(input).map(|p| p.path.clone()))
        .collect()
}

fn dfs_cycle(
    edges: &BTreeMap<String, Vec<String>>,
    node: &str,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    visited.insert(node.to_string());
    rec_stack.insert(node.to_string());
    path.push(node.to_string());

    if let Some(deps) = edges.get(node) {
        for dep in deps {
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_cycle(edges, dep, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                let cycle_start = path.iter().position(|n| n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[cycle_start..].to_vec();
                cycle.push(dep.clone());
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(node);
    None
}
