// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Check command - smoke-check the artifacts already on disk

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{load_pipeline, OutputFormat};
use crate::validator::{ArtifactValidator, ValidationPlan};

/// Run the check command
pub async fn run(
    pipeline_path: PathBuf,
    python: Option<String>,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let definition = load_pipeline(&pipeline_path)?;
    let validator = ArtifactValidator::for_definition(&definition, python.as_deref())?;

    let working_dir = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
    let plan = ValidationPlan::from_definition(&definition, &working_dir.join(&definition.artifacts_dir));

    let errors = validator.check(&plan).await;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&errors)
                .map_err(|e| miette::miette!("Failed to serialize report: {}", e))?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            if verbose {
                println!("{} {}", "Artifacts:".bold(), plan.artifacts_dir.display());
                for file in &plan.files {
                    println!("  - {} ({})", file.path.display(), file.stage_id);
                }
                println!();
            }

            if errors.is_empty() {
                println!("{}", "All artifacts passed the smoke check".green().bold());
            } else {
                println!("{}:", "Smoke check failed".red().bold());
                for err in &errors {
                    println!("  {} {}", "✗".red(), err);
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(miette::miette!(
            "{} smoke-check error(s) found",
            errors.len()
        ))
    }
}
