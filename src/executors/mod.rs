// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Stage executors
//!
//! This module provides the executor trait, the capability table the runner
//! resolves stage executors from, and the built-in implementations
//! (shell command, file).

mod file;
mod shell;

pub use file::FileExecutor;
pub use shell::ShellExecutor;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::errors::GenflowError;
use crate::pipeline::{Capabilities, ExecutorConfig, PipelineDefinition};

/// Everything an executor sees about a stage
#[derive(Debug, Clone)]
pub struct ExecutionRequest<'a> {
    /// Stage being executed
    pub stage_id: &'a str,
    /// Rendered task description
    pub description: &'a str,
    /// Rendered output contract
    pub expected_output: &'a str,
    /// Execution limits of the stage
    pub capabilities: &'a Capabilities,
    /// Outputs of the upstream stages listed in the stage's context
    pub context: &'a BTreeMap<String, String>,
}

/// Failure reported by an executor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("executor '{executor}' failed: {message}")]
    Failed { executor: String, message: String },

    #[error("executor did not finish within {:.1}s", .limit.as_secs_f64())]
    TimedOut { limit: Duration },

    #[error("executor produced no output")]
    EmptyOutput,

    #[error("malformed structured output: {message}")]
    MalformedOutput { message: String },
}

impl ExecutorError {
    pub fn failed(executor: &str, message: impl Into<String>) -> Self {
        Self::Failed {
            executor: executor.to_string(),
            message: message.into(),
        }
    }
}

/// Trait for stage executors
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Executor kind, used in logs
    fn name(&self) -> &str;

    /// Produce the stage output. Retries are the caller's responsibility.
    async fn execute(&self, request: &ExecutionRequest<'_>) -> Result<String, ExecutorError>;
}

/// Explicit table of executors, keyed by the names stages refer to
#[derive(Clone, Default)]
pub struct ExecutorTable {
    executors: HashMap<String, Arc<dyn StageExecutor>>,
}

impl ExecutorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table declared in a pipeline file
    pub fn from_definition(definition: &PipelineDefinition, working_dir: &Path) -> Self {
        let mut table = Self::new();

        for (name, config) in &definition.executors {
            let executor: Arc<dyn StageExecutor> = match config {
                ExecutorConfig::Shell { command, shell } => Arc::new(ShellExecutor::new(
                    command.clone(),
                    shell.clone(),
                    working_dir.to_path_buf(),
                )),
                ExecutorConfig::File { path } => {
                    Arc::new(FileExecutor::new(working_dir.join(path)))
                }
            };
            table.register(name, executor);
        }

        table
    }

    /// Register (or replace) an executor
    pub fn register(&mut self, name: &str, executor: Arc<dyn StageExecutor>) {
        self.executors.insert(name.to_string(), executor);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn StageExecutor>, GenflowError> {
        self.executors
            .get(name)
            .cloned()
            .ok_or_else(|| GenflowError::ExecutorNotFound {
                executor: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ExecutorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorTable")
            .field("executors", &self.names())
            .finish()
    }
}
