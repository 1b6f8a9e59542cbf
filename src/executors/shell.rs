// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Shell executor
//!
//! Hands the stage to an external command (a model CLI, a script, a human
//! prompt wrapper). The rendered description goes to stdin, the rest of the
//! request is exported as environment variables, stdout is the output.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ExecutionRequest, ExecutorError, StageExecutor};
use crate::pipeline::ExecutionMode;

/// Shell executor
pub struct ShellExecutor {
    command: String,
    shell: String,
    working_dir: PathBuf,
}

impl ShellExecutor {
    /// Create a new shell executor
    pub fn new(command: String, shell: String, working_dir: PathBuf) -> Self {
        Self {
            command,
            shell,
            working_dir,
        }
    }

    fn build_command(&self, request: &ExecutionRequest<'_>) -> Result<Command, ExecutorError> {
        let context = serde_json::to_string(request.context)
            .map_err(|e| ExecutorError::failed("shell", e.to_string()))?;

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&self.command);
        cmd.current_dir(&self.working_dir);

        if request.capabilities.execution_mode == ExecutionMode::Sandboxed {
            cmd.env_clear();
            if let Ok(path) = std::env::var("PATH") {
                cmd.env("PATH", path);
            }
        }

        cmd.env("GENFLOW_STAGE_ID", request.stage_id)
            .env("GENFLOW_DESCRIPTION", request.description)
            .env("GENFLOW_EXPECTED_OUTPUT", request.expected_output)
            .env("GENFLOW_CONTEXT", context)
            .env(
                "GENFLOW_ALLOW_CODE_EXECUTION",
                request.capabilities.allow_code_execution.to_string(),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(cmd)
    }
}

#[async_trait]
impl StageExecutor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn execute(&self, request: &ExecutionRequest<'_>) -> Result<String, ExecutorError> {
        let mut cmd = self.build_command(request)?;

        let mut child = cmd.spawn().map_err(|e| {
            ExecutorError::failed(
                "shell",
                format!("could not start '{}': {}", self.shell, e),
            )
        })?;

        // Feed stdin concurrently so a chatty command cannot block on a full stdout pipe.
        if let Some(mut stdin) = child.stdin.take() {
            let description = request.description.to_string();
            tokio::spawn(async move {
                // A command that ignores stdin may close it early; that is not a failure.
                let _ = stdin.write_all(description.as_bytes()).await;
            });
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecutorError::failed("shell", e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(ExecutorError::failed(
                "shell",
                format!("exit code {}: {}", exit_code, stderr.trim()),
            ));
        }

        if stdout.trim().is_empty() {
            return Err(ExecutorError::EmptyOutput);
        }

        Ok(stdout)
    }
}
