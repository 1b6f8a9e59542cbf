// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Run command - execute the pipeline

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::inputs::load_inputs;
use super::load_pipeline;
use crate::executors::ExecutorTable;
use crate::pipeline::{PipelineRunner, PipelineValidator};
use crate::repair::{HookReport, RepairOutcome};
use crate::validator::ArtifactValidator;

/// Options of `genflow run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub pipeline: PathBuf,
    pub inputs_file: Option<PathBuf>,
    pub inputs: Vec<String>,
    pub python: Option<String>,
    pub no_repair: bool,
}

/// Run the pipeline
pub async fn run(options: RunOptions, verbose: bool) -> Result<()> {
    let mut definition = load_pipeline(&options.pipeline)?;
    if options.no_repair {
        definition.repair.enabled = false;
    }

    // Validate pipeline
    let validation = PipelineValidator::validate(&definition);

    if !validation.is_valid() {
        eprintln!("{}", "Pipeline validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Pipeline configuration is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Pipeline warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    let inputs = load_inputs(options.inputs_file.as_deref(), &options.inputs)?;

    let working_dir = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;

    let table = ExecutorTable::from_definition(&definition, &working_dir);
    let mut runner = PipelineRunner::new(table, &working_dir);

    if definition.integration_stage.is_some() {
        let validator = ArtifactValidator::for_definition(&definition, options.python.as_deref())?;
        if verbose {
            eprintln!(
                "{} {}",
                "Smoke-check interpreter:".dimmed(),
                validator.interpreter().display()
            );
        }
        runner = runner.with_smoke_check(validator);
    }

    println!("{} {}", "Running pipeline".bold(), definition.name.cyan());
    println!();

    let result = runner.run(&definition, inputs).await?;

    for output in &result.outputs {
        let target = output
            .artifact
            .as_deref()
            .map(|p| format!(" -> {}", p.display()))
            .unwrap_or_default();
        let retries = if output.attempts > 1 {
            format!(" ({} attempts)", output.attempts).dimmed().to_string()
        } else {
            String::new()
        };
        println!("  {} {}{}{}", "✓".green(), output.stage_id, target, retries);
    }

    if let Some(ref report) = result.hook {
        println!();
        print_hook_report(report);
    }

    println!();
    let seconds = result.duration.as_secs_f64();
    if result.artifacts_healthy() {
        println!(
            "{} in {:.1}s",
            "Pipeline completed".green().bold(),
            seconds
        );
    } else {
        println!(
            "{} in {:.1}s; artifacts still fail the smoke check",
            "Pipeline completed".yellow().bold(),
            seconds
        );
    }

    Ok(())
}

fn print_hook_report(report: &HookReport) {
    if report.initial_errors.is_empty() {
        println!("{} passed", "Smoke check".bold());
        return;
    }

    println!("{} failed:", "Smoke check".bold());
    for err in &report.initial_errors {
        println!("  {} {}", "✗".red(), err);
    }

    println!();
    match &report.repair {
        RepairOutcome::Disabled => println!("{}", "Repair disabled".dimmed()),
        RepairOutcome::SkippedInProgress | RepairOutcome::NothingToRepair => {}
        RepairOutcome::AlreadyAttempted => {
            println!("{}", "Repair already attempted for this run".yellow())
        }
        RepairOutcome::Completed(repair) => {
            println!("{}:", "Repair".bold());
            for path in &repair.changed_artifacts {
                println!("  {} rewrote {}", "↻".cyan(), path.display());
            }
            for err in &repair.resolved {
                println!("  {} resolved: {}", "✓".green(), err.message);
            }
            for err in &repair.errors_after {
                println!("  {} remaining: {}", "✗".red(), err);
            }
        }
        RepairOutcome::Failed { failure, report } => {
            println!("{} {}", "Repair failed:".red().bold(), failure);
            for err in &report.errors_after {
                println!("  {} remaining: {}", "✗".red(), err);
            }
        }
    }
}
