// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Error types
//!
//! `GenflowError` covers everything that can abort a command: broken
//! definitions, fatal stage failures and I/O. Smoke-check findings are not
//! errors in this sense, see [`crate::validator::ValidationError`].

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

use crate::executors::ExecutorError;
use crate::template::TemplateError;

/// Result type for genflow operations
pub type GenflowResult<T> = Result<T, GenflowError>;

/// Main error type for genflow
#[derive(Error, Debug, Diagnostic)]
pub enum GenflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Executor Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Interpreter '{tool}' not found")]
    #[diagnostic(
        code(genflow::tool_not_found),
        help("{suggestion}")
    )]
    ToolNotFound { tool: String, suggestion: String },

    #[error("Executor '{executor}' is not registered")]
    #[diagnostic(
        code(genflow::executor_not_found),
        help("Declare it under 'executors:' in the pipeline file or register it programmatically")
    )]
    ExecutorNotFound { executor: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid pipeline configuration: {reason}")]
    #[diagnostic(code(genflow::invalid_pipeline))]
    InvalidPipeline {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Circular context dependency detected")]
    #[diagnostic(
        code(genflow::circular_dependency),
        help("Review the 'context' lists of your stages to remove the cycle")
    )]
    CircularDependency { stages: Vec<String> },

    #[error("Stage '{stage}' reads context from unknown stage '{dependency}'")]
    #[diagnostic(
        code(genflow::unknown_dependency),
        help("Check that '{dependency}' is declared in your pipeline")
    )]
    UnknownDependency { stage: String, dependency: String },

    #[error("Failed to interpolate inputs into stage '{stage}'")]
    #[diagnostic(
        code(genflow::interpolation_failed),
        help("Provide the missing input or escape literal braces as '{{{{' and '}}}}'")
    )]
    Interpolation {
        stage: String,
        #[source]
        source: TemplateError,
    },

    #[error("Invalid run input: {reason}")]
    #[diagnostic(code(genflow::invalid_input))]
    InvalidInput {
        reason: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' failed after {attempts} attempt(s)")]
    #[diagnostic(code(genflow::stage_failed))]
    StageFailed {
        stage: String,
        attempts: u32,
        #[source]
        source: ExecutorError,
    },

    #[error("Output of stage '{stage}' was already recorded for this run")]
    #[diagnostic(code(genflow::output_already_recorded))]
    OutputAlreadyRecorded { stage: String },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(genflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(genflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(genflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(genflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(genflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(genflow::toml_error))]
    Toml { message: String },
}

impl From<std::io::Error> for GenflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for GenflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for GenflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for GenflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl GenflowError {
    /// Create a tool not found error with installation suggestion
    pub fn tool_not_found(tool: &str) -> Self {
        let suggestion = match tool {
            "python3" | "python" => {
                "Install Python 3 or pass --python / set GENFLOW_PYTHON".to_string()
            }
            _ => format!("Install {} and ensure it's in your PATH", tool),
        };

        Self::ToolNotFound {
            tool: tool.to_string(),
            suggestion,
        }
    }

    /// Whether this error came from rendering stage text with run inputs
    pub fn is_interpolation(&self) -> bool {
        matches!(self, Self::Interpolation { .. })
    }
}
