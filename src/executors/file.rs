// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! File executor
//!
//! Deterministic executor returning the content of a file. Useful for
//! replaying known-good artifacts and for demos.

use async_trait::async_trait;
use std::path::PathBuf;

use super::{ExecutionRequest, ExecutorError, StageExecutor};

/// File executor
pub struct FileExecutor {
    path: PathBuf,
}

impl FileExecutor {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl StageExecutor for FileExecutor {
    fn name(&self) -> &str {
        "file"
    }

    async fn execute(&self, _request: &ExecutionRequest<'_>) -> Result<String, ExecutorError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ExecutorError::failed(
                "file",
                format!("cannot read '{}': {}", self.path.display(), e),
            )
        })
    }
}
