// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Pipeline validation
//!
//! Validates a pipeline definition before execution. Artifact smoke checks
//! live in [`crate::validator`].

use std::collections::HashSet;
use std::path::Component;

use crate::errors::GenflowError;
use crate::executors::ExecutorTable;
use crate::pipeline::{DagBuilder, OutputKind, PipelineDefinition, StageSpec};

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline definition.
    ///
    /// Executor references are checked against the definition's own
    /// `executors` table; use [`Self::validate_with_table`] when executors are
    /// registered programmatically.
    pub fn validate(pipeline: &PipelineDefinition) -> ValidationResult {
        let mut result = Self::validate_structure(pipeline);

        for stage in &pipeline.stages {
            if !pipeline.executors.contains_key(&stage.executor) {
                result.add_error(&format!(
                    "Stage '{}': unknown executor '{}'",
                    stage.id, stage.executor
                ));
            }
        }

        result
    }

    /// Validate a pipeline definition against an explicit executor table
    pub fn validate_with_table(
        pipeline: &PipelineDefinition,
        table: &ExecutorTable,
    ) -> ValidationResult {
        let mut result = Self::validate_structure(pipeline);

        for stage in &pipeline.stages {
            if !table.contains(&stage.executor) {
                result.add_error(&format!(
                    "Stage '{}': unknown executor '{}'",
                    stage.id, stage.executor
                ));
            }
        }

        result
    }

    fn validate_structure(pipeline: &PipelineDefinition) -> ValidationResult {
        let mut result = ValidationResult::new();

        if pipeline.stages.is_empty() {
            result.add_error("Pipeline has no stages defined");
        }

        let mut seen_ids = HashSet::new();
        for stage in &pipeline.stages {
            if !seen_ids.insert(&stage.id) {
                result.add_error(&format!("Duplicate stage id: '{}'", stage.id));
            }
        }

        match DagBuilder::build(pipeline) {
            Ok(dag) => {
                for (stage, dep) in dag.forward_references() {
                    result.add_error(&format!(
                        "Stage '{}' reads context from '{}', which runs after it",
                        stage, dep
                    ));
                }
            }
            Err(GenflowError::CircularDependency { stages }) => {
                result.add_error(&format!("Circular dependency: {}", stages.join(" → ")));
            }
            Err(GenflowError::UnknownDependency { stage, dependency }) => {
                result.add_error(&format!(
                    "Stage '{}' reads context from unknown stage '{}'",
                    stage, dependency
                ));
            }
            Err(e) => {
                result.add_error(&format!("DAG validation error: {}", e));
            }
        }

        let mut seen_files = HashSet::new();
        for stage in &pipeline.stages {
            Self::validate_stage(stage, &mut result);

            if let Some(ref file) = stage.output_file {
                if !seen_files.insert(file) {
                    result.add_warning(&format!(
                        "Stage '{}': output file '{}' is also written by an earlier stage",
                        stage.id,
                        file.display()
                    ));
                }
            }
        }

        Self::validate_designated_stages(pipeline, &mut result);

        result
    }

    /// Validate a single stage
    fn validate_stage(stage: &StageSpec, result: &mut ValidationResult) {
        if stage.id.trim().is_empty() {
            result.add_error("Stage with an empty id");
        }

        if stage.description.trim().is_empty() {
            result.add_warning(&format!("Stage '{}': description is empty", stage.id));
        }

        if stage.capabilities.max_execution_time.is_zero() {
            result.add_error(&format!(
                "Stage '{}': max_execution_time must be greater than zero",
                stage.id
            ));
        }

        if !stage.required_fields.is_empty() && stage.output_format != OutputKind::Json {
            result.add_warning(&format!(
                "Stage '{}': required_fields are only checked with output_format: json",
                stage.id
            ));
        }

        if let Some(ref file) = stage.output_file {
            let escapes = file.is_absolute()
                || file
                    .components()
                    .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
            if escapes {
                result.add_error(&format!(
                    "Stage '{}': output file '{}' must stay inside the artifacts directory",
                    stage.id,
                    file.display()
                ));
            }
        }
    }

    /// Validate integration and producer designations
    fn validate_designated_stages(pipeline: &PipelineDefinition, result: &mut ValidationResult) {
        match pipeline.integration_stage.as_deref() {
            Some(id) if pipeline.get_stage(id).is_none() => {
                result.add_error(&format!("Integration stage '{}' is not declared", id));
            }
            Some(_) => {}
            None if pipeline.repair.enabled => {
                result.add_warning(
                    "No integration stage declared; artifacts will not be smoke-checked or repaired",
                );
            }
            None => {}
        }

        if let Some(ref id) = pipeline.validation.producer_stage {
            match pipeline.get_stage(id) {
                None => result.add_error(&format!("Producer stage '{}' is not declared", id)),
                Some(stage) if stage.module_name().is_none() => {
                    result.add_error(&format!(
                        "Producer stage '{}' must write a Python module",
                        id
                    ));
                }
                Some(_) => {}
            }
        } else if pipeline.integration_stage.is_some() && pipeline.repair.enabled {
            result.add_warning(
                "No producer stage declared; symbol contract checks and repair are disabled",
            );
        }
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
