// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! # genflow - Generation Pipeline Orchestrator
//!
//! `genflow` drives an ordered sequence of generation stages that produce
//! interdependent source artifacts, smoke-checks that the artifacts actually
//! work together, and on failure runs exactly one automated repair pass.
//!
//! ## Features
//!
//! - **Sequential stages** - Declared order, explicit context wiring, retries
//! - **Swappable executors** - Shell commands, files, or your own [`StageExecutor`]
//! - **Smoke check** - Presence, syntax, runtime imports, symbol contract
//! - **Bounded repair** - One isolated repair pass per run, never fatal
//!
//! ## Quick Start
//!
//! ```bash
//! # Create a starter pipeline
//! genflow init my-project
//!
//! # Run it
//! genflow run --inputs inputs.toml
//!
//! # Smoke-check what is on disk
//! genflow check
//! ```

pub mod cli;
pub mod errors;
pub mod executors;
pub mod pipeline;
pub mod repair;
pub mod template;
pub mod validator;

// Re-export commonly used types
pub use errors::{GenflowError, GenflowResult};
pub use executors::{ExecutionRequest, ExecutorError, ExecutorTable, StageExecutor};
pub use pipeline::{Inputs, PipelineDefinition, PipelineRunner, RunResult, StageSpec};
pub use repair::{HookReport, RepairOrchestrator, RepairOutcome, SmokeCheckHook};
pub use validator::{ArtifactValidator, ValidationError, ValidationErrorKind, ValidationPlan};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
