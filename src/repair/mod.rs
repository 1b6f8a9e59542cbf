// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Bounded self-repair
//!
//! When the smoke check after the integration stage fails, one repair
//! sub-pipeline regenerates the producer module and the integration artifact,
//! then the artifacts are checked again. At most one repair runs per
//! pipeline run, never re-entrantly, and nothing it does can fail the run.

mod report;

pub use report::{HookReport, RepairFailure, RepairOutcome, RepairReport};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::errors::GenflowResult;
use crate::pipeline::artifact::digest;
use crate::pipeline::{
    HookInvocation, Inputs, PipelineDefinition, PipelineRun, PipelineRunner, PostStageHook,
    RunResult, StageSpec,
};
use crate::template::escape;
use crate::validator::{ArtifactValidator, ValidationError, ValidationPlan};

/// Runs the repair sub-pipeline through a hook-less runner
#[derive(Clone)]
pub struct RepairOrchestrator {
    runner: PipelineRunner,
    validator: ArtifactValidator,
}

impl RepairOrchestrator {
    pub fn new(runner: PipelineRunner, validator: ArtifactValidator) -> Self {
        Self {
            runner: runner.without_hook(),
            validator,
        }
    }

    /// Attempt one repair for `run`.
    ///
    /// Returns without doing anything when a repair is already running, when
    /// there is nothing to repair, or when the run already used its attempt.
    pub async fn attempt_repair(
        &self,
        run: &PipelineRun,
        definition: &PipelineDefinition,
        errors: &[ValidationError],
        integration_output: &str,
    ) -> RepairOutcome {
        let guardrail = run.guardrail();

        if guardrail.in_progress() {
            debug!(run_id = %run.id(), "Repair already in progress, skipping");
            return RepairOutcome::SkippedInProgress;
        }

        if errors.is_empty() {
            return RepairOutcome::NothingToRepair;
        }

        // Released when dropped, on every path out of this function
        let Some(_permit) = guardrail.try_begin() else {
            warn!(
                run_id = %run.id(),
                "Smoke check still failing after the repair attempt; no further automatic repairs"
            );
            for err in errors {
                warn!(kind = %err.kind, "{}", err.message);
            }
            return RepairOutcome::AlreadyAttempted;
        };

        info!(
            run_id = %run.id(),
            errors = errors.len(),
            "Smoke check failed, running one automated repair"
        );

        let plan = ValidationPlan::from_definition(definition, run.artifacts_dir());
        let digests_before = artifact_digests(&plan);

        let result = self
            .run_repair(run, definition, errors, integration_output)
            .await;

        let errors_after = self.validator.check(&plan).await;
        let report = RepairReport::new(
            errors.to_vec(),
            errors_after,
            &digests_before,
            &artifact_digests(&plan),
        );

        match result {
            Ok(sub) => {
                if report.is_clean() {
                    info!(
                        repair_run = %sub.run_id,
                        changed = report.changed_artifacts.len(),
                        "Repair resolved all smoke-check errors"
                    );
                } else {
                    warn!(
                        remaining = report.errors_after.len(),
                        "Repair completed but the smoke check still fails"
                    );
                    for err in &report.errors_after {
                        warn!(kind = %err.kind, "{}", err.message);
                    }
                }
                RepairOutcome::Completed(report)
            }
            Err(failure) => {
                error!(error = %failure, "Repair failed and was suppressed");
                RepairOutcome::Failed { failure, report }
            }
        }
    }

    async fn run_repair(
        &self,
        run: &PipelineRun,
        definition: &PipelineDefinition,
        errors: &[ValidationError],
        integration_output: &str,
    ) -> Result<RunResult, RepairFailure> {
        let module_name = repair_module_name(run, definition)?;
        let requirements = run.input_str("requirements").unwrap_or_default();

        let sub = build_repair_pipeline(
            run,
            definition,
            &module_name,
            &requirements,
            errors,
            integration_output,
        )?;

        // Only the two scalars the repair stages need; never the parent's
        // full input mapping.
        let mut inputs = Inputs::new();
        inputs.insert("module_name".into(), escape(&module_name).into());
        inputs.insert("requirements".into(), escape(&requirements).into());

        self.run_sub_pipeline(&sub, inputs).await
    }

    /// Run `sub`, retrying once without inputs if interpolation fails
    async fn run_sub_pipeline(
        &self,
        sub: &PipelineDefinition,
        inputs: Inputs,
    ) -> Result<RunResult, RepairFailure> {
        match self.runner.run(sub, inputs).await {
            Err(e) if e.is_interpolation() => {
                warn!(error = %e, "Repair interpolation failed, retrying without inputs");
                self.runner
                    .run(sub, Inputs::new())
                    .await
                    .map_err(RepairFailure::from)
            }
            other => other.map_err(RepairFailure::from),
        }
    }
}

/// The producer artifact's file name, preferring the run's `module_name`
/// input
fn repair_module_name(
    run: &PipelineRun,
    definition: &PipelineDefinition,
) -> Result<String, RepairFailure> {
    let from_inputs = run
        .input_str("module_name")
        .and_then(|m| file_name(Path::new(&m)));

    from_inputs
        .or_else(|| {
            definition
                .producer()
                .and_then(|s| s.output_file.as_deref())
                .and_then(file_name)
        })
        .ok_or_else(|| RepairFailure::MissingTarget {
            message: "no module name in the run inputs or the producer stage".into(),
        })
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}

fn bullet_list(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("- {}", escape(&e.to_string())))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Two-stage sub-pipeline: producer repair, then integration repair with the
/// producer repair as context. Every dynamic string is escaped.
fn build_repair_pipeline(
    run: &PipelineRun,
    definition: &PipelineDefinition,
    module_name: &str,
    requirements: &str,
    errors: &[ValidationError],
    integration_output: &str,
) -> Result<PipelineDefinition, RepairFailure> {
    let producer = target(definition.producer(), "producer")?;
    let integration = target(definition.integration(), "integration")?;
    let issues = bullet_list(errors);

    let producer_id = format!("repair_{}", producer.id);
    let mut producer_repair = StageSpec::new(&producer_id, &producer.executor)
        .description(format!(
            "Repair the module {} so it matches the architecture and what its consumers import.\n\
             Fix the issues found by the smoke check:\n{}",
            escape(module_name),
            issues
        ))
        .expected_output(
            "Valid Python code for {module_name}. \
             Output ONLY raw Python code without markdown or code fences.",
        )
        .capabilities(producer.capabilities.clone());
    producer_repair.output_file = producer.output_file.clone();
    producer_repair.language = producer.language;

    let mut builder = PipelineDefinition::builder(format!("{}-repair", definition.name))
        .artifacts_dir(run.artifacts_dir())
        .repair_enabled(false)
        .stage(producer_repair);

    if integration.id != producer.id {
        let integration_file = integration
            .output_file
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let mut integration_repair =
            StageSpec::new(format!("repair_{}", integration.id), &integration.executor)
                .description(format!(
                    "Repair {} and its wiring with the other generated modules and {{module_name}}.\n\
                     Use these constraints:\n\
                     - Requirements: {}\n\
                     - Keep imports and startup flow runnable from {}.\n\
                     Observed integration output:\n{}\n\
                     Smoke-check failures:\n{}",
                    escape(&integration_file),
                    escape(requirements),
                    escape(&integration_file),
                    escape(integration_output),
                    issues
                ))
                .expected_output(format!(
                    "Valid Python code for {} that correctly wires the application. \
                     Output ONLY raw Python code without markdown or code fences.",
                    escape(&integration_file)
                ))
                .context([producer_id.as_str()])
                .capabilities(integration.capabilities.clone());
        integration_repair.output_file = integration.output_file.clone();
        integration_repair.language = integration.language;

        builder = builder.stage(integration_repair);
    }

    let mut sub = builder.build();
    sub.executors = definition.executors.clone();
    Ok(sub)
}

fn target<'a>(
    stage: Option<&'a StageSpec>,
    role: &str,
) -> Result<&'a StageSpec, RepairFailure> {
    match stage {
        Some(stage) if stage.output_file.is_some() => Ok(stage),
        Some(stage) => Err(RepairFailure::MissingTarget {
            message: format!("{} stage '{}' has no output file", role, stage.id),
        }),
        None => Err(RepairFailure::MissingTarget {
            message: format!("no {} stage declared", role),
        }),
    }
}

fn artifact_digests(plan: &ValidationPlan) -> BTreeMap<PathBuf, Option<String>> {
    plan.files
        .iter()
        .map(|f| (f.path.clone(), digest(&f.path)))
        .collect()
}

/// Post-stage hook: smoke-check the artifacts, repair once on failure
pub struct SmokeCheckHook {
    validator: ArtifactValidator,
    orchestrator: RepairOrchestrator,
}

impl SmokeCheckHook {
    pub fn new(validator: ArtifactValidator, orchestrator: RepairOrchestrator) -> Self {
        Self {
            validator,
            orchestrator,
        }
    }
}

#[async_trait]
impl PostStageHook for SmokeCheckHook {
    async fn after_stage(&self, invocation: HookInvocation<'_>) -> GenflowResult<HookReport> {
        let HookInvocation {
            run,
            definition,
            stage,
            raw_output,
        } = invocation;

        if run.guardrail().in_progress() {
            return Ok(HookReport {
                initial_errors: Vec::new(),
                repair: RepairOutcome::SkippedInProgress,
            });
        }

        let plan = ValidationPlan::from_definition(definition, run.artifacts_dir());
        let errors = self.validator.check(&plan).await;
        if errors.is_empty() {
            info!(stage = %stage.id, "Integration smoke check passed");
            return Ok(HookReport::clean());
        }

        for err in &errors {
            warn!(stage = %stage.id, kind = %err.kind, "{}", err.message);
        }

        let repair = if definition.repair.enabled {
            self.orchestrator
                .attempt_repair(run, definition, &errors, raw_output)
                .await
        } else {
            info!("Automated repair disabled");
            RepairOutcome::Disabled
        };

        Ok(HookReport {
            initial_errors: errors,
            repair,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{ExecutionRequest, ExecutorError, ExecutorTable, StageExecutor};
    use crate::pipeline::{BackoffPolicy, Capabilities};
    use crate::validator::ValidationErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Records every request; fails every call when `fail` is set
    #[derive(Default)]
    struct Recorder {
        fail: bool,
        calls: AtomicUsize,
        requests: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl StageExecutor for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn execute(&self, request: &ExecutionRequest<'_>) -> Result<String, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push((
                request.stage_id.to_string(),
                request.description.to_string(),
                request.expected_output.to_string(),
            ));
            if self.fail {
                return Err(ExecutorError::failed("recorder", "model unavailable"));
            }
            Ok(format!("# regenerated by {}\n", request.stage_id))
        }
    }

    fn no_retry() -> Capabilities {
        Capabilities {
            max_retry_limit: 0,
            ..Capabilities::default()
        }
    }

    /// design.md is never written, so every check fails on presence.
    fn definition() -> PipelineDefinition {
        PipelineDefinition::builder("repair-test")
            .stage(StageSpec::new("design", "llm").output_file("design.md"))
            .stage(
                StageSpec::new("backend", "llm")
                    .output_file("backend.py")
                    .capabilities(no_retry()),
            )
            .stage(
                StageSpec::new("integration", "llm")
                    .output_file("main.py")
                    .context(["backend"])
                    .capabilities(no_retry()),
            )
            .integration_stage("integration")
            .producer_stage("backend")
            .build()
    }

    fn orchestrator(dir: &Path, executor: Arc<Recorder>) -> RepairOrchestrator {
        let mut table = ExecutorTable::new();
        table.register("llm", executor);
        let runner = PipelineRunner::new(table, dir).with_backoff(BackoffPolicy::None);
        let validator = ArtifactValidator::new("python3", Duration::from_secs(5));
        RepairOrchestrator::new(runner, validator)
    }

    fn run_in(dir: &Path, inputs: Inputs) -> PipelineRun {
        PipelineRun::new("repair-test", inputs, dir.join("output"))
    }

    fn smoke_error(message: &str) -> ValidationError {
        ValidationError {
            kind: ValidationErrorKind::ImportFailure,
            message: message.into(),
            path: None,
        }
    }

    #[tokio::test]
    async fn test_single_attempt_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(Recorder::default());
        let orchestrator = orchestrator(dir.path(), executor.clone());
        let run = run_in(dir.path(), Inputs::new());
        let errors = vec![smoke_error("cannot import name 'deposit'")];

        let first = orchestrator
            .attempt_repair(&run, &definition(), &errors, "")
            .await;
        assert!(matches!(first, RepairOutcome::Completed(_)));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

        let second = orchestrator
            .attempt_repair(&run, &definition(), &errors, "")
            .await;
        assert!(matches!(second, RepairOutcome::AlreadyAttempted));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

        assert!(run.guardrail().attempted());
        assert!(!run.guardrail().in_progress());
    }

    #[tokio::test]
    async fn test_reentrant_call_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(Recorder::default());
        let orchestrator = orchestrator(dir.path(), executor.clone());
        let run = run_in(dir.path(), Inputs::new());
        let errors = vec![smoke_error("broken")];

        let permit = run.guardrail().try_begin().unwrap();
        let outcome = orchestrator
            .attempt_repair(&run, &definition(), &errors, "")
            .await;
        assert!(matches!(outcome, RepairOutcome::SkippedInProgress));

        let hook = SmokeCheckHook::new(
            ArtifactValidator::new("python3", Duration::from_secs(5)),
            orchestrator.clone(),
        );
        let def = definition();
        let report = hook
            .after_stage(HookInvocation {
                run: &run,
                definition: &def,
                stage: &def.stages[2],
                raw_output: "",
            })
            .await
            .unwrap();
        assert!(matches!(report.repair, RepairOutcome::SkippedInProgress));
        assert!(report.initial_errors.is_empty());

        drop(permit);
        assert!(!run.guardrail().in_progress());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_errors_means_no_repair() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(Recorder::default());
        let run = run_in(dir.path(), Inputs::new());

        let outcome = orchestrator(dir.path(), executor.clone())
            .attempt_repair(&run, &definition(), &[], "")
            .await;

        assert!(matches!(outcome, RepairOutcome::NothingToRepair));
        assert!(!run.guardrail().attempted());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_injected_text_stays_literal() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(Recorder::default());
        let mut inputs = Inputs::new();
        inputs.insert("module_name".into(), "output/backend.py".into());
        inputs.insert("requirements".into(), "Accounts keyed by {account_id}".into());
        inputs.insert("irrelevant".into(), serde_json::json!({"nested": [1, 2]}));
        let run = run_in(dir.path(), inputs);

        let errors = vec![smoke_error("NameError: name '{module_name}' is not defined")];
        orchestrator(dir.path(), executor.clone())
            .attempt_repair(&run, &definition(), &errors, "printed {requirements} }{")
            .await;

        let requests = executor.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);

        let (stage, description, expected) = &requests[0];
        assert_eq!(stage, "repair_backend");
        assert!(description.starts_with("Repair the module backend.py "));
        assert!(description.contains("name '{module_name}' is not defined"));
        assert_eq!(
            expected,
            "Valid Python code for backend.py. Output ONLY raw Python code without markdown or code fences."
        );

        let (stage, description, _) = &requests[1];
        assert_eq!(stage, "repair_integration");
        assert!(description.contains("- Requirements: Accounts keyed by {account_id}"));
        assert!(description.contains("printed {requirements} }{"));
        assert!(description.contains("modules and backend.py."));
    }

    #[tokio::test]
    async fn test_repair_failure_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let run = run_in(dir.path(), Inputs::new());
        let errors = vec![smoke_error("broken")];

        let outcome = orchestrator(dir.path(), executor.clone())
            .attempt_repair(&run, &definition(), &errors, "")
            .await;

        match outcome {
            RepairOutcome::Failed { failure, report } => {
                assert!(matches!(failure, RepairFailure::StageFailed { ref stage, .. } if stage == "repair_backend"));
                // Re-validated once: design.md and the never-written files
                assert_eq!(report.errors_after.len(), 3);
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert!(!run.guardrail().in_progress());
    }

    #[tokio::test]
    async fn test_missing_producer_is_a_failure_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(Recorder::default());
        let run = run_in(dir.path(), Inputs::new());
        let mut def = definition();
        def.validation.producer_stage = None;

        let outcome = orchestrator(dir.path(), executor.clone())
            .attempt_repair(&run, &def, &[smoke_error("broken")], "")
            .await;

        assert!(matches!(
            outcome,
            RepairOutcome::Failed {
                failure: RepairFailure::MissingTarget { .. },
                ..
            }
        ));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_interpolation_failure_retries_without_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(Recorder::default());
        let sub = PipelineDefinition::builder("sub")
            .stage(
                StageSpec::new("repair_backend", "llm")
                    .description("Fix {unknown_key}")
                    .capabilities(no_retry()),
            )
            .build();

        let mut inputs = Inputs::new();
        inputs.insert("module_name".into(), "backend.py".into());

        let result = orchestrator(dir.path(), executor.clone())
            .run_sub_pipeline(&sub, inputs)
            .await
            .unwrap();

        assert_eq!(result.outputs.len(), 1);
        let requests = executor.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, "Fix {unknown_key}");
    }

    #[tokio::test]
    async fn test_hook_reports_disabled_repair() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(Recorder::default());
        let orchestrator = orchestrator(dir.path(), executor.clone());
        let hook = SmokeCheckHook::new(
            ArtifactValidator::new("python3", Duration::from_secs(5)),
            orchestrator,
        );
        let mut def = definition();
        def.repair.enabled = false;
        let run = run_in(dir.path(), Inputs::new());

        let report = hook
            .after_stage(HookInvocation {
                run: &run,
                definition: &def,
                stage: &def.stages[2],
                raw_output: "",
            })
            .await
            .unwrap();

        assert!(matches!(report.repair, RepairOutcome::Disabled));
        assert_eq!(report.initial_errors.len(), 3);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repair_writes_into_the_run_artifacts_dir() {
        // Relative working directory, as when the CLI runs with `-C proj`
        let dir = tempfile::Builder::new()
            .prefix("genflow-repair-")
            .tempdir_in(".")
            .unwrap();
        let relative = dir.path().to_path_buf();
        assert!(relative.is_relative());

        let executor = Arc::new(Recorder::default());
        let run = run_in(&relative, Inputs::new());
        assert!(run.artifacts_dir().is_absolute());

        let outcome = orchestrator(&relative, executor.clone())
            .attempt_repair(&run, &definition(), &[smoke_error("broken")], "")
            .await;

        match outcome {
            RepairOutcome::Completed(report) => {
                assert_eq!(
                    report.changed_artifacts,
                    vec![
                        run.artifacts_dir().join("backend.py"),
                        run.artifacts_dir().join("main.py")
                    ]
                );
            }
            other => panic!("Expected Completed, got {other:?}"),
        }
        assert!(relative.join("output/backend.py").is_file());
        assert!(!relative.join(&relative).exists());
    }
}
