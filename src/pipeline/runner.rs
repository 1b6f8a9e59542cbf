// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Pipeline runner
//!
//! Executes stages strictly in declared order, wires upstream outputs into
//! downstream context, writes artifacts and calls the post-stage hook after
//! the integration stage.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::artifact::{unfence, Artifact};
use super::retry::BackoffPolicy;
use super::run::{Inputs, PipelineRun, StageOutput};
use super::{OutputKind, PipelineDefinition, StageSpec};
use crate::errors::{GenflowError, GenflowResult};
use crate::executors::{ExecutionRequest, ExecutorError, ExecutorTable};
use crate::repair::{HookReport, RepairOrchestrator, SmokeCheckHook};
use crate::template;
use crate::validator::ArtifactValidator;

/// What a post-stage hook is told about the stage that just finished
#[derive(Debug, Clone, Copy)]
pub struct HookInvocation<'a> {
    pub run: &'a PipelineRun,
    pub definition: &'a PipelineDefinition,
    pub stage: &'a StageSpec,
    /// Raw executor output; empty if the stage failed
    pub raw_output: &'a str,
}

/// Side process invoked after the integration stage.
///
/// Whatever it returns, the runner's own result is unchanged.
#[async_trait]
pub trait PostStageHook: Send + Sync {
    async fn after_stage(&self, invocation: HookInvocation<'_>) -> GenflowResult<HookReport>;
}

/// Result of a completed run
#[derive(Debug, Serialize)]
pub struct RunResult {
    pub run_id: String,
    pub pipeline: String,
    /// Stage outputs in execution order
    pub outputs: Vec<StageOutput>,
    pub duration: Duration,
    /// Smoke-check and repair report, if the hook ran and returned one
    pub hook: Option<HookReport>,
}

impl RunResult {
    /// Files written during the run
    pub fn artifacts(&self) -> impl Iterator<Item = &Path> {
        self.outputs.iter().filter_map(|o| o.artifact.as_deref())
    }

    /// Whether the smoke check ended clean (or was not run)
    pub fn artifacts_healthy(&self) -> bool {
        self.hook
            .as_ref()
            .map(|h| h.final_errors().is_empty())
            .unwrap_or(true)
    }
}

/// Sequential pipeline runner
#[derive(Clone)]
pub struct PipelineRunner {
    executors: ExecutorTable,
    working_dir: PathBuf,
    backoff: BackoffPolicy,
    unfence_outputs: bool,
    hook: Option<Arc<dyn PostStageHook>>,
}

impl PipelineRunner {
    /// Create a runner over an explicit executor table
    pub fn new(executors: ExecutorTable, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            executors,
            working_dir: working_dir.into(),
            backoff: BackoffPolicy::default(),
            unfence_outputs: true,
            hook: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Keep Markdown fences around executor output instead of stripping them
    pub fn keep_fences(mut self) -> Self {
        self.unfence_outputs = false;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn PostStageHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Install the smoke-check/repair hook.
    ///
    /// The repair sub-pipeline runs through a copy of this runner without a
    /// hook, sharing the same executor table.
    pub fn with_smoke_check(self, validator: ArtifactValidator) -> Self {
        let repair_runner = self.without_hook();
        let orchestrator = RepairOrchestrator::new(repair_runner, validator.clone());
        self.with_hook(Arc::new(SmokeCheckHook::new(validator, orchestrator)))
    }

    pub fn without_hook(&self) -> Self {
        Self {
            hook: None,
            ..self.clone()
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn executors(&self) -> &ExecutorTable {
        &self.executors
    }

    /// Execute a pipeline.
    ///
    /// A stage that still fails after its retry budget aborts the run with
    /// [`GenflowError::StageFailed`]. Hook failures never do.
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
        inputs: Inputs,
    ) -> GenflowResult<RunResult> {
        let start = Instant::now();

        let rendered = render_stages(definition, &inputs)?;
        let artifacts_dir = self.working_dir.join(&definition.artifacts_dir);
        let mut run = PipelineRun::new(&definition.name, inputs, artifacts_dir);

        info!(
            pipeline = %definition.name,
            run_id = %run.id(),
            stages = definition.stages.len(),
            "Starting pipeline run"
        );

        let mut hook_report = None;

        for (stage, text) in definition.stages.iter().zip(&rendered) {
            match self.execute_stage(stage, text, &run).await {
                Ok((raw, attempts)) => {
                    let artifact = match stage.output_file {
                        Some(ref file) => Some(self.write_artifact(&run, stage, file, &raw).await?),
                        None => None,
                    };

                    info!(stage = %stage.id, attempts, "Stage completed");

                    run.record(StageOutput {
                        stage_id: stage.id.clone(),
                        raw: raw.clone(),
                        artifact,
                        attempts,
                    })?;

                    if definition.is_integration(&stage.id) {
                        hook_report = self.invoke_hook(&run, definition, stage, &raw).await;
                    }
                }
                Err(err) => {
                    error!(stage = %stage.id, error = %err, "Stage failed, aborting run");

                    if definition.is_integration(&stage.id) {
                        if let Some(report) = self.invoke_hook(&run, definition, stage, "").await {
                            warn!(
                                remaining = report.final_errors().len(),
                                "Smoke check ran after the integration stage failed"
                            );
                        }
                    }

                    return Err(err);
                }
            }
        }

        let duration = start.elapsed();
        info!(
            pipeline = %definition.name,
            duration_ms = duration.as_millis() as u64,
            "Pipeline run completed"
        );

        Ok(RunResult {
            run_id: run.id().to_string(),
            pipeline: definition.name.clone(),
            outputs: run.into_outputs(),
            duration,
            hook: hook_report,
        })
    }

    /// Execute one stage with its retry budget
    async fn execute_stage(
        &self,
        stage: &StageSpec,
        text: &RenderedStage,
        run: &PipelineRun,
    ) -> GenflowResult<(String, u32)> {
        let executor = self.executors.get(&stage.executor)?;
        let context = run.context_for(&stage.context);
        let caps = &stage.capabilities;

        let request = ExecutionRequest {
            stage_id: &stage.id,
            description: &text.description,
            expected_output: &text.expected_output,
            capabilities: caps,
            context: &context,
        };

        let max_attempts = caps.max_retry_limit.saturating_add(1);
        let mut last_err = ExecutorError::EmptyOutput;

        for attempt in 0..max_attempts {
            debug!(stage = %stage.id, executor = executor.name(), attempt, "Executing stage");

            let result = tokio::time::timeout(caps.max_execution_time, executor.execute(&request))
                .await
                .unwrap_or_else(|_| {
                    Err(ExecutorError::TimedOut {
                        limit: caps.max_execution_time,
                    })
                })
                .and_then(|output| check_output_format(stage, &output).map(|()| output));

            match result {
                Ok(output) => return Ok((output, attempt + 1)),
                Err(err) => {
                    warn!(stage = %stage.id, attempt, error = %err, "Executor attempt failed");
                    last_err = err;
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                    }
                }
            }
        }

        Err(GenflowError::StageFailed {
            stage: stage.id.clone(),
            attempts: max_attempts,
            source: last_err,
        })
    }

    async fn write_artifact(
        &self,
        run: &PipelineRun,
        stage: &StageSpec,
        file: &Path,
        raw: &str,
    ) -> GenflowResult<PathBuf> {
        let content = if self.unfence_outputs { unfence(raw) } else { raw };
        let mut content = content.to_string();
        if !content.ends_with('\n') {
            content.push('\n');
        }

        let artifact = Artifact {
            path: run.artifacts_dir().join(file),
            producing_stage_id: stage.id.clone(),
            content,
        };
        artifact.write().await?;
        debug!(stage = %stage.id, path = %artifact.path.display(), "Artifact written");

        Ok(artifact.path)
    }

    async fn invoke_hook(
        &self,
        run: &PipelineRun,
        definition: &PipelineDefinition,
        stage: &StageSpec,
        raw_output: &str,
    ) -> Option<HookReport> {
        let hook = self.hook.as_ref()?;

        let invocation = HookInvocation {
            run,
            definition,
            stage,
            raw_output,
        };

        match hook.after_stage(invocation).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(stage = %stage.id, error = %e, "Post-stage hook failed and was suppressed");
                None
            }
        }
    }
}

/// Hold the output to the stage's declared shape. A mismatch is an executor
/// failure, so it is retried like any other.
fn check_output_format(stage: &StageSpec, output: &str) -> Result<(), ExecutorError> {
    if stage.output_format == OutputKind::Text {
        return Ok(());
    }

    let value: serde_json::Value =
        serde_json::from_str(unfence(output)).map_err(|e| ExecutorError::MalformedOutput {
            message: format!("stage '{}' did not return JSON: {}", stage.id, e),
        })?;

    if stage.required_fields.is_empty() {
        return Ok(());
    }

    let Some(object) = value.as_object() else {
        return Err(ExecutorError::MalformedOutput {
            message: format!("stage '{}' must return a JSON object", stage.id),
        });
    };

    let missing: Vec<&str> = stage
        .required_fields
        .iter()
        .filter(|field| !object.contains_key(field.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(ExecutorError::MalformedOutput {
            message: format!(
                "stage '{}' output is missing fields: {}",
                stage.id,
                missing.join(", ")
            ),
        });
    }

    Ok(())
}

/// Stage text after interpolation
#[derive(Debug, Clone)]
struct RenderedStage {
    description: String,
    expected_output: String,
}

/// Render every stage up front so interpolation problems surface before any
/// executor runs.
fn render_stages(
    definition: &PipelineDefinition,
    inputs: &Inputs,
) -> GenflowResult<Vec<RenderedStage>> {
    definition
        .stages
        .iter()
        .map(|stage| {
            let wrap = |source| GenflowError::Interpolation {
                stage: stage.id.clone(),
                source,
            };
            Ok(RenderedStage {
                description: template::render(&stage.description, inputs).map_err(wrap)?,
                expected_output: template::render(&stage.expected_output, inputs).map_err(wrap)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::StageExecutor;
    use crate::pipeline::Capabilities;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Executor answering with a fixed string, failing the first `failures` calls
    struct Scripted {
        output: String,
        failures: usize,
        calls: AtomicUsize,
        seen: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl Scripted {
        fn new(output: &str, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                output: output.to_string(),
                failures,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl StageExecutor for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn execute(&self, request: &ExecutionRequest<'_>) -> Result<String, ExecutorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((
                request.description.to_string(),
                request.context.keys().cloned().collect(),
            ));
            if n < self.failures {
                return Err(ExecutorError::failed("scripted", "not yet"));
            }
            Ok(format!("{} <- {}", self.output, request.context.len()))
        }
    }

    struct CountingHook {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PostStageHook for CountingHook {
        async fn after_stage(&self, invocation: HookInvocation<'_>) -> GenflowResult<HookReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(invocation.stage.id, "c");
            if self.fail {
                return Err(GenflowError::Io { message: "hook exploded".into() });
            }
            Ok(HookReport::clean())
        }
    }

    fn caps(retries: u32) -> Capabilities {
        Capabilities {
            max_retry_limit: retries,
            ..Capabilities::default()
        }
    }

    fn pipeline(retries: u32) -> PipelineDefinition {
        PipelineDefinition::builder("runner-test")
            .stage(
                StageSpec::new("a", "x")
                    .description("Build {module_name}")
                    .output_file("a.txt")
                    .capabilities(caps(retries)),
            )
            .stage(StageSpec::new("b", "x").description("Plan").context(["a"]))
            .stage(
                StageSpec::new("c", "x")
                    .description("Integrate")
                    .output_file("c.txt")
                    .context(["a", "b"]),
            )
            .integration_stage("c")
            .build()
    }

    fn runner(dir: &Path, executor: Arc<Scripted>) -> PipelineRunner {
        let mut table = ExecutorTable::new();
        table.register("x", executor);
        PipelineRunner::new(table, dir).with_backoff(BackoffPolicy::None)
    }

    fn inputs() -> Inputs {
        let mut inputs = Inputs::new();
        inputs.insert("module_name".into(), serde_json::json!("backend.py"));
        inputs
    }

    #[tokio::test]
    async fn test_stages_run_in_order_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Scripted::new("out", 0);
        let result = runner(dir.path(), executor.clone())
            .run(&pipeline(0), inputs())
            .await
            .unwrap();

        let ids: Vec<_> = result.outputs.iter().map(|o| o.stage_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let seen = executor.seen.lock().unwrap();
        assert_eq!(seen[0].0, "Build backend.py");
        assert!(seen[0].1.is_empty());
        assert_eq!(seen[2].1, vec!["a".to_string(), "b".to_string()]);

        let written = std::fs::read_to_string(dir.path().join("output/c.txt")).unwrap();
        assert_eq!(written, "out <- 2\n");
        assert_eq!(result.artifacts().count(), 2);
    }

    #[tokio::test]
    async fn test_retries_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Scripted::new("out", 2);
        let result = runner(dir.path(), executor.clone())
            .run(&pipeline(2), inputs())
            .await
            .unwrap();

        assert_eq!(result.outputs[0].attempts, 3);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_exhausted_retries_abort_run() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Scripted::new("out", 10);
        let err = runner(dir.path(), executor.clone())
            .run(&pipeline(1), inputs())
            .await
            .unwrap_err();

        match err {
            GenflowError::StageFailed { stage, attempts, .. } => {
                assert_eq!(stage, "a");
                assert_eq!(attempts, 2);
            }
            other => panic!("Expected StageFailed, got {other:?}"),
        }
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_interpolation_failure_happens_before_execution() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Scripted::new("out", 0);
        let mut inputs = Inputs::new();
        inputs.insert("other".into(), serde_json::json!("x"));

        let err = runner(dir.path(), executor.clone())
            .run(&pipeline(0), inputs)
            .await
            .unwrap_err();

        assert!(err.is_interpolation());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hook_runs_once_after_integration_stage() {
        let dir = tempfile::tempdir().unwrap();
        let hook = Arc::new(CountingHook {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let result = runner(dir.path(), Scripted::new("out", 0))
            .with_hook(hook.clone())
            .run(&pipeline(0), inputs())
            .await
            .unwrap();

        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
        assert!(result.hook.is_some());
        assert!(result.artifacts_healthy());
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_change_result() {
        let dir = tempfile::tempdir().unwrap();
        let hook = Arc::new(CountingHook {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let result = runner(dir.path(), Scripted::new("out", 0))
            .with_hook(hook.clone())
            .run(&pipeline(0), inputs())
            .await
            .unwrap();

        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
        assert!(result.hook.is_none());
        assert_eq!(result.outputs.len(), 3);
    }

    #[tokio::test]
    async fn test_stage_timeout_counts_as_failure() {
        struct Slow;

        #[async_trait]
        impl StageExecutor for Slow {
            fn name(&self) -> &str {
                "slow"
            }

            async fn execute(&self, _: &ExecutionRequest<'_>) -> Result<String, ExecutorError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late".into())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut table = ExecutorTable::new();
        table.register("slow", Arc::new(Slow));
        let definition = PipelineDefinition::builder("slow")
            .stage(StageSpec::new("a", "slow").capabilities(Capabilities {
                max_execution_time: Duration::from_millis(20),
                max_retry_limit: 0,
                ..Capabilities::default()
            }))
            .build();

        let err = PipelineRunner::new(table, dir.path())
            .run(&definition, Inputs::new())
            .await
            .unwrap_err();

        match err {
            GenflowError::StageFailed { source, .. } => {
                assert!(matches!(source, ExecutorError::TimedOut { .. }));
            }
            other => panic!("Expected StageFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hook_runs_when_integration_stage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let hook = Arc::new(CountingHook {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let broken = Scripted::new("never", 10);

        let mut table = ExecutorTable::new();
        table.register("x", Scripted::new("out", 0));
        table.register("broken", broken.clone());

        let mut definition = pipeline(0);
        definition.stages[2].executor = "broken".into();
        definition.stages[2].capabilities = caps(1);

        let err = PipelineRunner::new(table, dir.path())
            .with_backoff(BackoffPolicy::None)
            .with_hook(hook.clone())
            .run(&definition, inputs())
            .await
            .unwrap_err();

        match err {
            GenflowError::StageFailed { stage, attempts, .. } => {
                assert_eq!(stage, "c");
                assert_eq!(attempts, 2);
            }
            other => panic!("Expected StageFailed, got {other:?}"),
        }
        assert_eq!(broken.calls.load(Ordering::SeqCst), 2);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("output/c.txt").exists());
    }

    #[tokio::test]
    async fn test_relative_working_dir_gives_absolute_artifacts_dir() {
        struct DirHook {
            seen: Mutex<Option<PathBuf>>,
        }

        #[async_trait]
        impl PostStageHook for DirHook {
            async fn after_stage(&self, invocation: HookInvocation<'_>) -> GenflowResult<HookReport> {
                *self.seen.lock().unwrap() = Some(invocation.run.artifacts_dir().to_path_buf());
                Ok(HookReport::clean())
            }
        }

        // No stage writes a file, so nothing lands in the relative directory
        let definition = PipelineDefinition::builder("relative")
            .stage(StageSpec::new("only", "x").description("Plan"))
            .integration_stage("only")
            .build();
        let hook = Arc::new(DirHook {
            seen: Mutex::new(None),
        });

        let mut table = ExecutorTable::new();
        table.register("x", Scripted::new("out", 0));
        PipelineRunner::new(table, "genflow-relative-project")
            .with_hook(hook.clone())
            .run(&definition, Inputs::new())
            .await
            .unwrap();

        let seen = hook.seen.lock().unwrap().clone().unwrap();
        assert!(seen.is_absolute());
        assert_eq!(
            seen,
            std::env::current_dir()
                .unwrap()
                .join("genflow-relative-project")
                .join("output")
        );
    }

    /// Executor returning `outputs[n]` on call `n`, repeating the last one
    struct Sequence {
        outputs: Vec<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StageExecutor for Sequence {
        fn name(&self) -> &str {
            "sequence"
        }

        async fn execute(&self, _: &ExecutionRequest<'_>) -> Result<String, ExecutorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let output = self.outputs[n.min(self.outputs.len() - 1)];
            Ok(output.to_string())
        }
    }

    fn structured_pipeline(retries: u32) -> PipelineDefinition {
        PipelineDefinition::builder("structured")
            .stage(
                StageSpec::new("design", "architect")
                    .description("Design it")
                    .output_file("architecture.json")
                    .json_output(["app_summary", "modules"])
                    .capabilities(caps(retries)),
            )
            .build()
    }

    fn architect(outputs: Vec<&'static str>) -> (PipelineRunner, Arc<Sequence>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(Sequence {
            outputs,
            calls: AtomicUsize::new(0),
        });
        let mut table = ExecutorTable::new();
        table.register("architect", executor.clone());
        let runner = PipelineRunner::new(table, dir.path()).with_backoff(BackoffPolicy::None);
        (runner, executor, dir)
    }

    #[tokio::test]
    async fn test_malformed_structured_output_is_retried() {
        let (runner, executor, dir) = architect(vec![
            "Here is the architecture you asked for",
            r#"{"app_summary": "ledger"}"#,
            "```json\n{\"app_summary\": \"ledger\", \"modules\": []}\n```",
        ]);

        let result = runner.run(&structured_pipeline(2), Inputs::new()).await.unwrap();

        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.outputs[0].attempts, 3);
        let written = std::fs::read_to_string(dir.path().join("output/architecture.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["app_summary"], "ledger");
    }

    #[tokio::test]
    async fn test_structured_output_failure_exhausts_budget() {
        let (runner, executor, dir) = architect(vec!["[1, 2, 3]"]);

        let err = runner
            .run(&structured_pipeline(1), Inputs::new())
            .await
            .unwrap_err();

        match err {
            GenflowError::StageFailed { stage, source, .. } => {
                assert_eq!(stage, "design");
                assert_eq!(
                    source,
                    ExecutorError::MalformedOutput {
                        message: "stage 'design' must return a JSON object".into()
                    }
                );
            }
            other => panic!("Expected StageFailed, got {other:?}"),
        }
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert!(!dir.path().join("output/architecture.json").exists());
    }
}
