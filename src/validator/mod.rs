// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Artifact smoke check
//!
//! Four phases, each gated on the previous ones:
//!
//! 1. every expected file exists
//! 2. every existing Python file compiles
//! 3. one child process imports every expected module
//! 4. names consumers import from the producer module are actually exported
//!
//! Findings of the first two phases are reported together; phases 3 and 4
//! only run on a complete tree that compiles.
//!
//! The check never writes to the artifacts directory and never aborts: all
//! findings come back as [`ValidationError`]s.

pub mod imports;
pub mod probe;

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{GenflowError, GenflowResult};
use crate::pipeline::artifact::absolutize;
use crate::pipeline::{ArtifactLanguage, PipelineDefinition};
use probe::{Probe, EXPORTS_SCRIPT, IMPORT_SCRIPT, SYNTAX_SCRIPT};

/// Probe timeout when neither the validation config nor an integration
/// stage provides one
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Category of a smoke-check finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    MissingArtifact,
    SyntaxError,
    ImportFailure,
    SymbolContractMismatch,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MissingArtifact => "missing artifact",
            Self::SyntaxError => "syntax error",
            Self::ImportFailure => "import failure",
            Self::SymbolContractMismatch => "symbol contract mismatch",
        };
        f.write_str(name)
    }
}

/// A single smoke-check finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
    pub path: Option<PathBuf>,
}

impl ValidationError {
    fn new(kind: ValidationErrorKind, message: impl Into<String>, path: Option<&Path>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: path.map(Path::to_path_buf),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// A file the smoke check expects
#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub stage_id: String,
    pub path: PathBuf,
    pub language: ArtifactLanguage,
    /// Import name for Python files
    pub module: Option<String>,
}

/// What to check, derived statically from a pipeline definition
#[derive(Debug, Clone)]
pub struct ValidationPlan {
    pub artifacts_dir: PathBuf,
    pub files: Vec<PlannedFile>,
    /// Modules imported together by the runtime probe
    pub probe_modules: Vec<String>,
    /// Module other artifacts import from
    pub producer_module: Option<String>,
}

impl ValidationPlan {
    pub fn from_definition(definition: &PipelineDefinition, artifacts_dir: &Path) -> Self {
        let artifacts_dir = absolutize(artifacts_dir);

        let files: Vec<PlannedFile> = definition
            .artifact_stages()
            .filter_map(|stage| {
                let file = stage.output_file.as_ref()?;
                Some(PlannedFile {
                    stage_id: stage.id.clone(),
                    path: artifacts_dir.join(file),
                    language: stage.artifact_language(),
                    module: stage.module_name(),
                })
            })
            .collect();

        let probe_modules = match definition.validation.probe_modules {
            Some(ref modules) => modules.clone(),
            None => {
                let mut seen = BTreeSet::new();
                files
                    .iter()
                    .filter_map(|f| f.module.clone())
                    .filter(|m| seen.insert(m.clone()))
                    .collect()
            }
        };

        Self {
            artifacts_dir,
            files,
            probe_modules,
            producer_module: definition.producer().and_then(|s| s.module_name()),
        }
    }

    fn python_files(&self) -> impl Iterator<Item = &PlannedFile> {
        self.files
            .iter()
            .filter(|f| f.language == ArtifactLanguage::Python)
    }

    fn producer_file(&self) -> Option<&PlannedFile> {
        let producer = self.producer_module.as_deref()?;
        self.python_files()
            .find(|f| f.module.as_deref() == Some(producer))
    }
}

/// Names one consumer file imports from the producer module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRequirement {
    pub consumer: PathBuf,
    pub module: String,
    pub names: BTreeSet<String>,
}

/// Collect what every consumer requires from `plan`'s producer module.
///
/// Consumers that cannot be read are skipped; presence was already checked.
pub fn collect_requirements(plan: &ValidationPlan) -> Vec<SymbolRequirement> {
    let Some(producer) = plan.producer_module.as_deref() else {
        return Vec::new();
    };

    plan.python_files()
        .filter(|f| f.module.as_deref() != Some(producer))
        .filter_map(|f| {
            let source = std::fs::read_to_string(&f.path).ok()?;
            let names = imports::required_symbols(&source, producer);
            (!names.is_empty()).then(|| SymbolRequirement {
                consumer: f.path.clone(),
                module: producer.to_string(),
                names,
            })
        })
        .collect()
}

/// Runs the smoke check in isolated interpreter processes
#[derive(Debug, Clone)]
pub struct ArtifactValidator {
    probe: Probe,
    interpreter: PathBuf,
    timeout: Duration,
}

impl ArtifactValidator {
    pub fn new(interpreter: impl Into<PathBuf>, timeout: Duration) -> Self {
        let interpreter = interpreter.into();
        Self {
            probe: Probe::new(interpreter.clone(), timeout),
            interpreter,
            timeout,
        }
    }

    /// Configure a validator from a definition.
    ///
    /// `interpreter` overrides the one named in the validation config. The
    /// probe timeout falls back to the integration stage's execution limit.
    pub fn for_definition(
        definition: &PipelineDefinition,
        interpreter: Option<&str>,
    ) -> GenflowResult<Self> {
        let explicit = interpreter.or(definition.validation.interpreter.as_deref());
        let interpreter = locate_interpreter(explicit)?;

        let timeout = definition
            .validation
            .probe_timeout
            .or_else(|| {
                definition
                    .integration()
                    .map(|s| s.capabilities.max_execution_time)
            })
            .unwrap_or(DEFAULT_PROBE_TIMEOUT);

        Ok(Self::new(interpreter, timeout))
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run all phases against the files on disk
    pub async fn check(&self, plan: &ValidationPlan) -> Vec<ValidationError> {
        // Missing files do not stop the syntax check of the files that exist
        let mut errors = self.check_presence(plan);
        let missing = errors.len();
        errors.extend(self.check_syntax(plan).await);
        if !errors.is_empty() {
            info!(
                missing,
                syntax = errors.len() - missing,
                "Smoke check failed"
            );
            return errors;
        }

        if let Some(err) = self.check_imports(plan).await {
            info!(phase = "import", "Smoke check failed");
            return vec![err];
        }

        if let Some(err) = self.check_symbol_contract(plan).await {
            info!(phase = "contract", "Smoke check failed");
            return vec![err];
        }

        info!(files = plan.files.len(), "Smoke check passed");
        Vec::new()
    }

    fn check_presence(&self, plan: &ValidationPlan) -> Vec<ValidationError> {
        plan.files
            .iter()
            .filter(|f| !f.path.is_file())
            .map(|f| {
                ValidationError::new(
                    ValidationErrorKind::MissingArtifact,
                    format!(
                        "Missing required artifact: {} (stage '{}')",
                        display_relative(&f.path, &plan.artifacts_dir),
                        f.stage_id
                    ),
                    Some(&f.path),
                )
            })
            .collect()
    }

    async fn check_syntax(&self, plan: &ValidationPlan) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for file in plan.python_files().filter(|f| f.path.is_file()) {
            let shown = display_relative(&file.path, &plan.artifacts_dir);
            let path_arg = file.path.to_string_lossy();
            debug!(phase = "syntax", path = %shown, "Compiling");

            let detail = match self
                .probe
                .run(SYNTAX_SCRIPT, &[&*path_arg], &plan.artifacts_dir)
                .await
            {
                Ok(out) if out.success() => continue,
                Ok(out) => out.diagnostic(),
                Err(e) => e.to_string(),
            };

            errors.push(ValidationError::new(
                ValidationErrorKind::SyntaxError,
                format!("Syntax error in {}: {}", shown, detail),
                Some(&file.path),
            ));
        }

        errors
    }

    async fn check_imports(&self, plan: &ValidationPlan) -> Option<ValidationError> {
        if plan.probe_modules.is_empty() {
            return None;
        }

        let dir = plan.artifacts_dir.to_string_lossy();
        let mut args: Vec<&str> = vec![&*dir];
        args.extend(plan.probe_modules.iter().map(String::as_str));
        debug!(phase = "import", modules = ?plan.probe_modules, "Probing imports");

        let detail = match self.probe.run(IMPORT_SCRIPT, &args, &plan.artifacts_dir).await {
            Ok(out) if out.success() => return None,
            Ok(out) => out.diagnostic(),
            Err(e) => e.to_string(),
        };

        Some(ValidationError::new(
            ValidationErrorKind::ImportFailure,
            format!(
                "Import smoke check failed for modules [{}]: {}",
                plan.probe_modules.join(", "),
                detail
            ),
            None,
        ))
    }

    async fn check_symbol_contract(&self, plan: &ValidationPlan) -> Option<ValidationError> {
        let producer = plan.producer_file()?;
        let module = producer.module.as_deref()?;

        let required: BTreeSet<String> = collect_requirements(plan)
            .into_iter()
            .flat_map(|r| r.names)
            .collect();
        if required.is_empty() {
            return None;
        }

        let path_arg = producer.path.to_string_lossy();
        let dir_arg = plan.artifacts_dir.to_string_lossy();
        debug!(phase = "contract", module, required = required.len(), "Loading producer");

        let load_failure = |detail: String| {
            ValidationError::new(
                ValidationErrorKind::SymbolContractMismatch,
                format!("{} failed to load for contract check: {}", module, detail),
                Some(&producer.path),
            )
        };

        let exported = match self
            .probe
            .run(
                EXPORTS_SCRIPT,
                &[module, &*path_arg, &*dir_arg],
                &plan.artifacts_dir,
            )
            .await
        {
            Ok(out) if out.success() => match probe::parse_exports(&out.stdout) {
                Some(names) => names.into_iter().collect::<BTreeSet<_>>(),
                None => return Some(load_failure("no export list in probe output".into())),
            },
            Ok(out) => return Some(load_failure(out.diagnostic())),
            Err(e) => return Some(load_failure(e.to_string())),
        };

        let missing: Vec<&str> = required
            .difference(&exported)
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            return None;
        }

        warn!(module, missing = ?missing, "Producer does not export imported names");
        Some(ValidationError::new(
            ValidationErrorKind::SymbolContractMismatch,
            format!(
                "{} import contract mismatch. Missing exported symbols: {}",
                module,
                missing.join(", ")
            ),
            Some(&producer.path),
        ))
    }
}

/// Resolve the interpreter: an explicit name or path, else `python3`, else
/// `python` on `PATH`.
pub fn locate_interpreter(explicit: Option<&str>) -> GenflowResult<PathBuf> {
    if let Some(name) = explicit {
        return which::which(name).map_err(|_| GenflowError::tool_not_found(name));
    }

    which::which("python3")
        .or_else(|_| which::which("python"))
        .map_err(|_| GenflowError::tool_not_found("python3"))
}

fn display_relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .display()
        .to_string()
}
