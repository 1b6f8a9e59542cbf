// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Validate command - check pipeline configuration

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::load_pipeline;
use crate::pipeline::PipelineValidator;

/// Run the validate command
pub async fn run(pipeline_path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    let pipeline = load_pipeline(&pipeline_path)?;

    println!("  {} Pipeline file is valid YAML", "✓".green());

    let validation = PipelineValidator::validate(&pipeline);

    if !validation.errors.is_empty() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose {
        println!();
        println!("{}:", "Pipeline summary".bold());
        println!("  Name: {}", pipeline.name);
        println!("  Artifacts: {}", pipeline.artifacts_dir.display());
        println!("  Stages: {}", pipeline.stages.len());
        for stage in &pipeline.stages {
            let context = if stage.context.is_empty() {
                String::new()
            } else {
                format!(" [context: {}]", stage.context.join(", "))
            };
            println!("    - {} ({}){}", stage.id, stage.executor, context.dimmed());
        }
        if let Some(ref integration) = pipeline.integration_stage {
            println!("  Integration stage: {}", integration);
        }
        if let Some(ref producer) = pipeline.validation.producer_stage {
            println!("  Producer stage: {}", producer);
        }
    }

    println!();

    if !validation.is_valid() {
        Err(miette::miette!("Pipeline validation failed"))
    } else if validation.has_warnings() {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
        Ok(())
    } else {
        println!("{}", "Pipeline is valid!".green().bold());
        Ok(())
    }
}
