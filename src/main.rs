// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! genflow - Generation Pipeline Orchestrator
//!
//! Run generation stages, smoke-check the artifacts and repair them once.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genflow::cli::{run::RunOptions, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genflow=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Init { name } => genflow::cli::init::run(name, cli.verbose).await,
        Commands::Run {
            pipeline,
            inputs,
            input,
            python,
            no_repair,
        } => {
            let options = RunOptions {
                pipeline,
                inputs_file: inputs,
                inputs: input,
                python,
                no_repair,
            };
            genflow::cli::run::run(options, cli.verbose).await
        }
        Commands::Check {
            pipeline,
            python,
            format,
        } => genflow::cli::check::run(pipeline, python, format, cli.verbose).await,
        Commands::Validate { pipeline } => {
            genflow::cli::validate::run(pipeline, cli.verbose).await
        }
        Commands::Graph { pipeline, format } => {
            genflow::cli::graph::run(pipeline, format, cli.verbose).await
        }
    }
}
