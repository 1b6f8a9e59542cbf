// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Pipeline definition structures
//!
//! Defines the schema for .genflow.yaml files and the builder used to
//! declare pipelines in code.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::duration_serde;

/// Pipeline definition from .genflow.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Pipeline description
    #[serde(default)]
    pub description: Option<String>,

    /// Root directory for stage output files
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Executor capability table, keyed by the name stages refer to
    #[serde(default)]
    pub executors: BTreeMap<String, ExecutorConfig>,

    /// Stages in execution order
    pub stages: Vec<StageSpec>,

    /// Stage after which artifacts are smoke-checked
    #[serde(default)]
    pub integration_stage: Option<String>,

    /// Smoke-check configuration
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Automated repair configuration
    #[serde(default)]
    pub repair: RepairConfig,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("output")
}

impl PipelineDefinition {
    /// Start declaring a pipeline in code
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Load pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, crate::GenflowError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::GenflowError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            }
        })?;

        Self::from_yaml(&content)
    }

    /// Parse pipeline from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, crate::GenflowError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Serialize pipeline to YAML
    pub fn to_yaml(&self) -> Result<String, crate::GenflowError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a stage by id
    pub fn get_stage(&self, id: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Get all stage ids
    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.id.as_str()).collect()
    }

    /// The stage designated as the integration point, if declared
    pub fn integration(&self) -> Option<&StageSpec> {
        self.integration_stage
            .as_deref()
            .and_then(|id| self.get_stage(id))
    }

    /// The stage producing the root module other artifacts import from
    pub fn producer(&self) -> Option<&StageSpec> {
        self.validation
            .producer_stage
            .as_deref()
            .and_then(|id| self.get_stage(id))
    }

    /// Stages that write a file, in declared order
    pub fn artifact_stages(&self) -> impl Iterator<Item = &StageSpec> {
        self.stages.iter().filter(|s| s.output_file.is_some())
    }

    /// Whether `stage_id` is the integration stage
    pub fn is_integration(&self, stage_id: &str) -> bool {
        self.integration_stage.as_deref() == Some(stage_id)
    }
}

/// A single pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage id (must be unique within pipeline)
    pub id: String,

    /// Task description handed to the executor, may reference `{inputs}`
    #[serde(default)]
    pub description: String,

    /// Contract describing what the executor should return
    #[serde(default)]
    pub expected_output: String,

    /// Name of the executor in the capability table
    pub executor: String,

    /// Execution limits
    #[serde(default)]
    pub capabilities: Capabilities,

    /// File written with the stage output, relative to `artifacts_dir`
    #[serde(default)]
    pub output_file: Option<PathBuf>,

    /// Upstream stage ids whose outputs are visible to this stage
    #[serde(default)]
    pub context: Vec<String>,

    /// Language of the output file (inferred from the extension if unset)
    #[serde(default)]
    pub language: Option<ArtifactLanguage>,

    /// Shape the executor output must have to count as a success
    #[serde(default)]
    pub output_format: OutputKind,

    /// Top-level keys a `json` output must contain
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl StageSpec {
    /// Create a stage bound to an executor
    pub fn new(id: impl Into<String>, executor: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            expected_output: String::new(),
            executor: executor.into(),
            capabilities: Capabilities::default(),
            output_file: None,
            context: Vec::new(),
            language: None,
            output_format: OutputKind::default(),
            required_fields: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn expected_output(mut self, expected_output: impl Into<String>) -> Self {
        self.expected_output = expected_output.into();
        self
    }

    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    pub fn context<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Require a JSON object output with the given top-level keys
    pub fn json_output<I, S>(mut self, required_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_format = OutputKind::Json;
        self.required_fields = required_fields.into_iter().map(Into::into).collect();
        self
    }

    /// Effective language of the output file
    pub fn artifact_language(&self) -> ArtifactLanguage {
        if let Some(language) = self.language {
            return language;
        }

        match self
            .output_file
            .as_deref()
            .and_then(Path::extension)
            .and_then(|e| e.to_str())
        {
            Some("py") => ArtifactLanguage::Python,
            _ => ArtifactLanguage::Text,
        }
    }

    /// Importable module name of the output file (`backend.py` -> `backend`)
    pub fn module_name(&self) -> Option<String> {
        if self.artifact_language() != ArtifactLanguage::Python {
            return None;
        }
        self.output_file
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().to_string())
    }
}

/// Execution limits handed to the executor and enforced by the runner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether the executor may run the code it produces
    #[serde(default)]
    pub allow_code_execution: bool,

    /// Isolation requested from the executor
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    /// Time limit for a single executor attempt
    #[serde(default = "default_max_execution_time", with = "duration_serde")]
    pub max_execution_time: Duration,

    /// Extra attempts after the first failure
    #[serde(default = "default_max_retry_limit")]
    pub max_retry_limit: u32,
}

fn default_max_execution_time() -> Duration {
    Duration::from_secs(500)
}

fn default_max_retry_limit() -> u32 {
    3
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            allow_code_execution: false,
            execution_mode: ExecutionMode::default(),
            max_execution_time: default_max_execution_time(),
            max_retry_limit: default_max_retry_limit(),
        }
    }
}

/// Isolation level for executors that run code
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Unrestricted,
    #[default]
    Sandboxed,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unrestricted => write!(f, "unrestricted"),
            Self::Sandboxed => write!(f, "sandboxed"),
        }
    }
}

/// Shape of a stage's raw output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Free text or source code, accepted as is
    #[default]
    Text,
    /// A JSON value, optionally wrapped in a single code fence
    Json,
}

/// Language of a generated artifact
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactLanguage {
    /// Python source: syntax-checked, import-probed and contract-checked
    Python,
    /// Anything else: presence only
    Text,
}

/// Executor specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutorConfig {
    /// Pipe the stage description into a shell command and capture stdout
    Shell {
        /// Shell command to run
        command: String,

        /// Shell to use (bash, sh, etc.)
        #[serde(default = "default_shell")]
        shell: String,
    },

    /// Return the content of a file
    File {
        /// Path relative to the working directory
        path: PathBuf,
    },
}

fn default_shell() -> String {
    "bash".to_string()
}

impl ExecutorConfig {
    /// Executor kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Shell { .. } => "shell",
            Self::File { .. } => "file",
        }
    }
}

/// Smoke-check configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Stage whose module the other artifacts import from
    #[serde(default)]
    pub producer_stage: Option<String>,

    /// Interpreter used for syntax and import probes
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Probe time limit (defaults to the integration stage's limit)
    #[serde(default, with = "duration_serde::option")]
    pub probe_timeout: Option<Duration>,

    /// Modules imported by the runtime probe (defaults to every Python artifact)
    #[serde(default)]
    pub probe_modules: Option<Vec<String>>,
}

/// Automated repair configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Run the repair sub-pipeline when the smoke check fails
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

/// Builder for pipelines declared in code
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    definition: PipelineDefinition,
}

impl PipelineBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            definition: PipelineDefinition {
                version: default_version(),
                name: name.into(),
                description: None,
                artifacts_dir: default_artifacts_dir(),
                executors: BTreeMap::new(),
                stages: Vec::new(),
                integration_stage: None,
                validation: ValidationConfig::default(),
                repair: RepairConfig::default(),
            },
        }
    }

    pub fn artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.definition.artifacts_dir = dir.into();
        self
    }

    pub fn executor(mut self, name: impl Into<String>, config: ExecutorConfig) -> Self {
        self.definition.executors.insert(name.into(), config);
        self
    }

    pub fn stage(mut self, stage: StageSpec) -> Self {
        self.definition.stages.push(stage);
        self
    }

    pub fn integration_stage(mut self, id: impl Into<String>) -> Self {
        self.definition.integration_stage = Some(id.into());
        self
    }

    pub fn producer_stage(mut self, id: impl Into<String>) -> Self {
        self.definition.validation.producer_stage = Some(id.into());
        self
    }

    pub fn interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.definition.validation.interpreter = Some(interpreter.into());
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.definition.validation.probe_timeout = Some(timeout);
        self
    }

    pub fn repair_enabled(mut self, enabled: bool) -> Self {
        self.definition.repair.enabled = enabled;
        self
    }

    pub fn build(self) -> PipelineDefinition {
        self.definition
    }
}
