// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Init command - create a starter pipeline

use colored::Colorize;
use miette::Result;
use std::path::Path;

use super::DEFAULT_PIPELINE;

/// Run the init command
pub async fn run(name: Option<String>, verbose: bool) -> Result<()> {
    let pipeline_name = name.unwrap_or_else(|| {
        std::env::current_dir()
            .ok()
            .and_then(|p| p.file_name().map(|s| s.to_string_lossy().to_string()))
            .unwrap_or_else(|| "my-pipeline".to_string())
    });

    println!("{}", "Initializing genflow pipeline...".bold());
    println!();

    if Path::new(DEFAULT_PIPELINE).exists() {
        return Err(miette::miette!(
            "{} already exists; remove it first to start over",
            DEFAULT_PIPELINE
        ));
    }

    let pipeline_content = generate_default_template(&pipeline_name);

    std::fs::write(DEFAULT_PIPELINE, &pipeline_content)
        .map_err(|e| miette::miette!("Failed to write {}: {}", DEFAULT_PIPELINE, e))?;

    println!("  {} Created {}", "✓".green(), DEFAULT_PIPELINE);

    let inputs = "requirements = \"A simple account management system\"\nmodule_name = \"backend.py\"\n";
    if !Path::new("inputs.toml").exists() {
        std::fs::write("inputs.toml", inputs)
            .map_err(|e| miette::miette!("Failed to write inputs.toml: {}", e))?;
        println!("  {} Created inputs.toml", "✓".green());
    }

    println!();
    println!("{}", "Pipeline initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  1. Point the executors in {} at your generator",
        DEFAULT_PIPELINE.cyan()
    );
    println!("  2. Describe what to build in {}", "inputs.toml".cyan());
    println!("  3. Run {} to execute the pipeline", "genflow run --inputs inputs.toml".cyan());
    println!();

    if verbose {
        println!("{}", "Generated pipeline:".dimmed());
        println!("{}", "─".repeat(50).dimmed());
        println!("{}", pipeline_content.dimmed());
    }

    Ok(())
}

fn generate_default_template(name: &str) -> String {
    format!(
        r#"# genflow pipeline configuration

version: "1"
name: "{name}"
artifacts_dir: output

# Each executor receives the rendered stage description on stdin and
# GENFLOW_STAGE_ID, GENFLOW_EXPECTED_OUTPUT and GENFLOW_CONTEXT in its
# environment; whatever it prints is the stage output.
executors:
  engineer:
    type: shell
    command: "./generate.sh"

stages:
  - id: design
    description: "Write a detailed design for {{module_name}} that meets: {{requirements}}"
    expected_output: "A design in markdown listing every function and class"
    executor: engineer
    output_file: design.md

  - id: backend
    description: "Implement {{module_name}} following the design"
    expected_output: "Raw Python code only, no markdown fences"
    executor: engineer
    output_file: backend.py
    context: [design]

  - id: frontend
    description: "Write app.py, a small UI that imports from the backend module"
    expected_output: "Raw Python code only, no markdown fences"
    executor: engineer
    output_file: app.py
    context: [backend]

  - id: integration
    description: "Write main.py, which wires app.py and the backend together"
    expected_output: "Raw Python code only, no markdown fences"
    executor: engineer
    output_file: main.py
    context: [backend, frontend]
    capabilities:
      max_execution_time: 120s
      max_retry_limit: 1

integration_stage: integration

validation:
  producer_stage: backend

repair:
  enabled: true
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineDefinition, PipelineValidator};

    #[test]
    fn test_template_is_a_valid_pipeline() {
        let yaml = generate_default_template("demo");
        let pipeline = PipelineDefinition::from_yaml(&yaml).unwrap();

        assert_eq!(pipeline.name, "demo");
        assert_eq!(pipeline.stages[0].description, "Write a detailed design for {module_name} that meets: {requirements}");
        assert!(PipelineValidator::validate(&pipeline).is_valid());
    }
}
