// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for genflow.

pub mod check;
pub mod graph;
pub mod init;
pub mod inputs;
pub mod run;
pub mod validate;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::pipeline::PipelineDefinition;

/// Default pipeline file name
pub const DEFAULT_PIPELINE: &str = ".genflow.yaml";

/// Generation pipeline orchestrator
///
/// Run staged generation, smoke-check the artifacts and repair them once.
#[derive(Parser, Debug)]
#[clap(
    name = "genflow",
    version,
    about = "Generation pipeline orchestrator with artifact smoke checks and bounded self-repair",
    long_about = None,
    after_help = "Examples:\n\
        genflow init                            Create a starter pipeline\n\
        genflow run --input module_name=accounts.py\n\
        genflow check                           Smoke-check existing artifacts\n\
        genflow graph --format mermaid          Show the context graph\n\n\
        See 'genflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a starter .genflow.yaml
    Init {
        /// Pipeline name (defaults to current directory name)
        name: Option<String>,
    },

    /// Run the pipeline
    Run {
        /// Pipeline file
        #[clap(short, long, default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,

        /// Input file (.toml, .yaml, .yml or .json)
        #[clap(long, value_name = "FILE")]
        inputs: Option<PathBuf>,

        /// Input value, overrides the input file
        #[clap(short, long = "input", value_name = "KEY=VALUE")]
        input: Vec<String>,

        /// Interpreter used for the smoke check
        #[clap(long, env = "GENFLOW_PYTHON", value_name = "PATH")]
        python: Option<String>,

        /// Report smoke-check failures without repairing
        #[clap(long)]
        no_repair: bool,
    },

    /// Smoke-check the artifacts currently on disk
    Check {
        /// Pipeline file
        #[clap(short, long, default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,

        /// Interpreter used for the smoke check
        #[clap(long, env = "GENFLOW_PYTHON", value_name = "PATH")]
        python: Option<String>,

        /// Output format
        #[clap(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate pipeline configuration
    Validate {
        /// Pipeline file to validate
        #[clap(default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,
    },

    /// Show the stage context graph
    Graph {
        /// Pipeline file
        #[clap(default_value = DEFAULT_PIPELINE)]
        pipeline: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value = "text")]
        format: GraphFormat,
    },
}

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Load a pipeline file, with the `genflow init` hint when it is missing
pub(crate) fn load_pipeline(path: &Path) -> miette::Result<PipelineDefinition> {
    if !path.exists() {
        return Err(miette::miette!(
            "Pipeline file not found: {}\n\n\
             Run 'genflow init' to create one.",
            path.display()
        ));
    }

    PipelineDefinition::from_file(path)
        .map_err(|e| miette::miette!("Failed to load pipeline: {}", e))
}
