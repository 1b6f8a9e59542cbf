// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Pipeline definitions and execution
//!
//! This module defines the stage data model, the per-run state and the
//! sequential runner that drives stages through their executors.

pub mod artifact;
mod dag;
mod definition;
pub(crate) mod duration_serde;
mod retry;
mod run;
mod runner;
mod validation;

pub use artifact::Artifact;
pub use dag::DagBuilder;
pub use definition::*;
pub use retry::BackoffPolicy;
pub use run::{Inputs, PipelineRun, RepairGuardrail, RepairPermit, StageOutput};
pub use runner::{HookInvocation, PipelineRunner, PostStageHook, RunResult};
pub use validation::{PipelineValidator, ValidationResult};
