// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Artifacts written by stages

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::errors::GenflowError;

/// A file produced by a stage
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub producing_stage_id: String,
    pub content: String,
}

impl Artifact {
    /// Write the artifact, replacing whatever was there
    pub async fn write(&self) -> Result<(), GenflowError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GenflowError::FileWriteError {
                    path: parent.to_path_buf(),
                    error: e.to_string(),
                }
            })?;
        }

        tokio::fs::write(&self.path, &self.content)
            .await
            .map_err(|e| GenflowError::FileWriteError {
                path: self.path.clone(),
                error: e.to_string(),
            })
    }
}

/// Strip a Markdown code fence wrapping the whole output.
///
/// Only a single fence spanning the entire text is removed; fences in the
/// middle of prose are left alone.
pub fn unfence(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return output;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return output;
    };
    // Drop the info string (```python)
    let Some((_, body)) = body.split_once('\n') else {
        return output;
    };
    if body.contains("\n```") {
        return output;
    }
    body.trim_end_matches(&['\n', '\r'][..])
}

/// `path` resolved against the current directory
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Content digest of a file, `None` if it does not exist
pub fn digest(path: &Path) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|bytes| blake3::hash(&bytes).to_hex().to_string())
}
