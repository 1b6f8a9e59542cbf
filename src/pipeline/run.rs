// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Per-run state
//!
//! A [`PipelineRun`] owns everything that changes while a pipeline executes:
//! the recorded stage outputs and the repair guardrail flags. A fresh run
//! starts with both flags cleared.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::artifact::absolutize;
use crate::errors::{GenflowError, GenflowResult};

/// Scalar configuration values a run is started with
pub type Inputs = BTreeMap<String, serde_json::Value>;

/// Output of one stage
#[derive(Debug, Clone, Serialize)]
pub struct StageOutput {
    pub stage_id: String,
    pub raw: String,
    /// File the output was written to, if the stage declares one
    pub artifact: Option<PathBuf>,
    /// Executor attempts it took
    pub attempts: u32,
}

/// One execution of a pipeline definition
#[derive(Debug)]
pub struct PipelineRun {
    id: String,
    inputs: Inputs,
    artifacts_dir: PathBuf,
    outputs: Vec<StageOutput>,
    guardrail: RepairGuardrail,
}

impl PipelineRun {
    /// Start a run. A relative `artifacts_dir` is resolved against the
    /// current directory, so sub-pipelines can reuse it as is.
    pub fn new(pipeline_name: &str, inputs: Inputs, artifacts_dir: PathBuf) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        Self {
            id: format!("{}-{}", pipeline_name, millis),
            inputs,
            artifacts_dir: absolutize(&artifacts_dir),
            outputs: Vec::new(),
            guardrail: RepairGuardrail::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// String form of a scalar input, if present
    pub fn input_str(&self, key: &str) -> Option<String> {
        match self.inputs.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    pub fn guardrail(&self) -> &RepairGuardrail {
        &self.guardrail
    }

    /// Record a stage output. Each stage id can be recorded once.
    pub fn record(&mut self, output: StageOutput) -> GenflowResult<()> {
        if self.output(&output.stage_id).is_some() {
            return Err(GenflowError::OutputAlreadyRecorded {
                stage: output.stage_id,
            });
        }
        self.outputs.push(output);
        Ok(())
    }

    pub fn output(&self, stage_id: &str) -> Option<&StageOutput> {
        self.outputs.iter().find(|o| o.stage_id == stage_id)
    }

    /// Outputs in the order they were recorded
    pub fn outputs(&self) -> &[StageOutput] {
        &self.outputs
    }

    /// Visible context for a stage: outputs of the listed upstream ids
    pub fn context_for(&self, ids: &[String]) -> BTreeMap<String, String> {
        ids.iter()
            .filter_map(|id| self.output(id).map(|o| (id.clone(), o.raw.clone())))
            .collect()
    }

    pub(crate) fn into_outputs(self) -> Vec<StageOutput> {
        self.outputs
    }
}

/// Run-scoped flags bounding automated repair
#[derive(Debug, Default)]
pub struct RepairGuardrail {
    attempted: AtomicBool,
    in_progress: AtomicBool,
}

impl RepairGuardrail {
    pub fn attempted(&self) -> bool {
        self.attempted.load(Ordering::SeqCst)
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Claim the single repair attempt of this run.
    ///
    /// Returns `None` if a repair is running or one was already made. The
    /// returned permit clears the in-progress flag when dropped; the attempted
    /// flag stays set.
    pub fn try_begin(&self) -> Option<RepairPermit<'_>> {
        if self.in_progress() || self.attempted.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.in_progress.store(true, Ordering::SeqCst);
        Some(RepairPermit { guardrail: self })
    }
}

/// Held for the duration of a repair sub-pipeline
#[derive(Debug)]
pub struct RepairPermit<'a> {
    guardrail: &'a RepairGuardrail,
}

impl Drop for RepairPermit<'_> {
    fn drop(&mut self) {
        self.guardrail.in_progress.store(false, Ordering::SeqCst);
    }
}
