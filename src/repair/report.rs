// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! What the smoke-check hook and the repair pass report back

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::errors::GenflowError;
use crate::validator::ValidationError;

/// Outcome of the post-integration hook
#[derive(Debug, Clone, Serialize)]
pub struct HookReport {
    /// Findings of the first smoke check
    pub initial_errors: Vec<ValidationError>,
    pub repair: RepairOutcome,
}

impl HookReport {
    /// Smoke check passed, nothing to repair
    pub fn clean() -> Self {
        Self {
            initial_errors: Vec::new(),
            repair: RepairOutcome::NothingToRepair,
        }
    }

    /// Findings still standing once the hook is done
    pub fn final_errors(&self) -> &[ValidationError] {
        match &self.repair {
            RepairOutcome::Completed(report) | RepairOutcome::Failed { report, .. } => {
                &report.errors_after
            }
            _ => &self.initial_errors,
        }
    }
}

/// What the repair orchestrator did
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RepairOutcome {
    /// A repair was already running for this run
    SkippedInProgress,
    /// The smoke check found nothing
    NothingToRepair,
    /// The run already spent its single repair attempt
    AlreadyAttempted,
    /// Repair turned off in the pipeline configuration
    Disabled,
    /// The sub-pipeline ran; the report says whether it helped
    Completed(RepairReport),
    /// The sub-pipeline failed; the failure was suppressed
    Failed {
        failure: RepairFailure,
        report: RepairReport,
    },
}

impl RepairOutcome {
    /// Whether a repair sub-pipeline was started
    pub fn attempted(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed { .. })
    }
}

/// Errors before and after a repair pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    pub errors_before: Vec<ValidationError>,
    pub errors_after: Vec<ValidationError>,
    /// Findings gone after the repair
    pub resolved: Vec<ValidationError>,
    /// Findings present after the repair that were not there before
    pub introduced: Vec<ValidationError>,
    /// Artifacts whose content the repair changed
    pub changed_artifacts: Vec<PathBuf>,
}

impl RepairReport {
    pub fn new(
        errors_before: Vec<ValidationError>,
        errors_after: Vec<ValidationError>,
        digests_before: &BTreeMap<PathBuf, Option<String>>,
        digests_after: &BTreeMap<PathBuf, Option<String>>,
    ) -> Self {
        let resolved = errors_before
            .iter()
            .filter(|e| !errors_after.contains(e))
            .cloned()
            .collect();
        let introduced = errors_after
            .iter()
            .filter(|e| !errors_before.contains(e))
            .cloned()
            .collect();
        let changed_artifacts = digests_after
            .iter()
            .filter(|(path, digest)| digests_before.get(*path) != Some(*digest))
            .map(|(path, _)| path.clone())
            .collect();

        Self {
            errors_before,
            errors_after,
            resolved,
            introduced,
            changed_artifacts,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors_after.is_empty()
    }
}

/// Why a repair pass failed. Always logged, never propagated.
#[derive(Error, Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairFailure {
    #[error("repair inputs could not be interpolated: {message}")]
    Interpolation { message: String },

    #[error("repair stage '{stage}' failed after {attempts} attempt(s): {message}")]
    StageFailed {
        stage: String,
        attempts: u32,
        message: String,
    },

    #[error("repair pipeline error: {message}")]
    Pipeline { message: String },

    #[error("no repair target: {message}")]
    MissingTarget { message: String },
}

impl From<GenflowError> for RepairFailure {
    fn from(err: GenflowError) -> Self {
        match err {
            interpolation @ GenflowError::Interpolation { .. } => Self::Interpolation {
                message: interpolation.to_string(),
            },
            GenflowError::StageFailed {
                stage,
                attempts,
                source,
            } => Self::StageFailed {
                stage,
                attempts,
                message: source.to_string(),
            },
            other => Self::Pipeline {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::ExecutorError;
    use crate::validator::ValidationErrorKind;

    fn err(kind: ValidationErrorKind, message: &str) -> ValidationError {
        ValidationError {
            kind,
            message: message.into(),
            path: None,
        }
    }

    #[test]
    fn test_report_diff() {
        let missing = err(ValidationErrorKind::ImportFailure, "cannot import deposit");
        let contract = err(ValidationErrorKind::SymbolContractMismatch, "missing withdraw");

        let before_digests = BTreeMap::from([
            (PathBuf::from("backend.py"), Some("aaa".to_string())),
            (PathBuf::from("main.py"), Some("bbb".to_string())),
        ]);
        let after_digests = BTreeMap::from([
            (PathBuf::from("backend.py"), Some("ccc".to_string())),
            (PathBuf::from("main.py"), Some("bbb".to_string())),
        ]);

        let report = RepairReport::new(
            vec![missing.clone()],
            vec![contract.clone()],
            &before_digests,
            &after_digests,
        );

        assert_eq!(report.resolved, vec![missing]);
        assert_eq!(report.introduced, vec![contract]);
        assert_eq!(report.changed_artifacts, vec![PathBuf::from("backend.py")]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_final_errors_follow_outcome() {
        let initial = vec![err(ValidationErrorKind::MissingArtifact, "main.py")];

        let skipped = HookReport {
            initial_errors: initial.clone(),
            repair: RepairOutcome::AlreadyAttempted,
        };
        assert_eq!(skipped.final_errors(), initial.as_slice());

        let repaired = HookReport {
            initial_errors: initial.clone(),
            repair: RepairOutcome::Completed(RepairReport {
                errors_before: initial,
                ..RepairReport::default()
            }),
        };
        assert!(repaired.final_errors().is_empty());
        assert!(repaired.repair.attempted());
        assert!(HookReport::clean().final_errors().is_empty());
    }

    #[test]
    fn test_failure_from_stage_error() {
        let failure = RepairFailure::from(GenflowError::StageFailed {
            stage: "repair_backend".into(),
            attempts: 2,
            source: ExecutorError::failed("shell", "exit code 1"),
        });

        match failure {
            RepairFailure::StageFailed { stage, attempts, .. } => {
                assert_eq!(stage, "repair_backend");
                assert_eq!(attempts, 2);
            }
            other => panic!("Expected StageFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(RepairOutcome::Failed {
            failure: RepairFailure::MissingTarget {
                message: "no producer".into(),
            },
            report: RepairReport::default(),
        })
        .unwrap();

        assert_eq!(json["status"], "failed");
        assert_eq!(json["failure"]["kind"], "missing_target");
    }
}
