// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 genflow contributors

//! Isolated interpreter probes
//!
//! Generated code may have arbitrary module-level side effects, so it is only
//! ever executed in short-lived child processes, never in-process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

use crate::errors::GenflowError;

/// Compile a file without executing it or writing bytecode.
pub(crate) const SYNTAX_SCRIPT: &str = r#"
import sys
path = sys.argv[1]
with open(path, "rb") as handle:
    source = handle.read()
try:
    compile(source, path, "exec", dont_inherit=True)
except SyntaxError as exc:
    print(f"{exc.msg} (line {exc.lineno})", file=sys.stderr)
    sys.exit(1)
"#;

/// Import every module named on the command line with the artifacts
/// directory first on the module path.
pub(crate) const IMPORT_SCRIPT: &str = r#"
import importlib
import sys
sys.path.insert(0, sys.argv[1])
for name in sys.argv[2:]:
    importlib.import_module(name)
"#;

/// Marker preceding the exported-name list on stdout
pub(crate) const EXPORTS_MARKER: &str = "__GENFLOW_EXPORTS__";

/// Load one module from its file, fresh, and print its attribute names.
pub(crate) const EXPORTS_SCRIPT: &str = r#"
import importlib.util
import json
import sys
name, path, search_dir = sys.argv[1], sys.argv[2], sys.argv[3]
sys.path.insert(0, search_dir)
spec = importlib.util.spec_from_file_location(name, path)
if spec is None or spec.loader is None:
    print(f"cannot create a module spec for {path}", file=sys.stderr)
    sys.exit(2)
module = importlib.util.module_from_spec(spec)
sys.modules[name] = module
spec.loader.exec_module(module)
print()
print("__GENFLOW_EXPORTS__" + json.dumps(sorted(dir(module))))
"#;

/// Outcome of one probe process
#[derive(Debug, Clone)]
pub struct ProbeOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ProbeOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Diagnostic text: stderr if there is any, stdout otherwise
    pub fn diagnostic(&self) -> String {
        if self.timed_out {
            return format!("timed out after {:.1}s", self.duration.as_secs_f64());
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exited with code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs interpreter scripts in child processes
#[derive(Debug, Clone)]
pub struct Probe {
    interpreter: PathBuf,
    timeout: Duration,
}

impl Probe {
    pub fn new(interpreter: PathBuf, timeout: Duration) -> Self {
        Self {
            interpreter,
            timeout,
        }
    }

    /// Run `script` with `args` in `cwd`.
    ///
    /// Only a failure to start the interpreter is an `Err`; script failures
    /// and timeouts are reported through [`ProbeOutput`].
    pub async fn run(
        &self,
        script: &str,
        args: &[&str],
        cwd: &Path,
    ) -> Result<ProbeOutput, GenflowError> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-B")
            .arg("-c")
            .arg(script)
            .args(args)
            .current_dir(cwd)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| GenflowError::Io {
            message: format!(
                "failed to start interpreter '{}': {}",
                self.interpreter.display(),
                e
            ),
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                // Dropping the wait future kills the child (kill_on_drop).
                return Ok(ProbeOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                    duration: start.elapsed(),
                });
            }
        };

        let probe = ProbeOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
            duration: start.elapsed(),
        };
        debug!(
            interpreter = %self.interpreter.display(),
            exit_code = ?probe.exit_code,
            duration_ms = probe.duration.as_millis() as u64,
            "Probe finished"
        );

        Ok(probe)
    }
}

/// Parse the exported names printed by [`EXPORTS_SCRIPT`]
pub(crate) fn parse_exports(stdout: &str) -> Option<Vec<String>> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(EXPORTS_MARKER))
        .and_then(|json| serde_json::from_str(json).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exports_ignores_module_prints() {
        let stdout = "hello from module\n\n__GENFLOW_EXPORTS__[\"bar\", \"foo\"]\n";
        assert_eq!(
            parse_exports(stdout),
            Some(vec!["bar".to_string(), "foo".to_string()])
        );
        assert_eq!(parse_exports("no marker"), None);
    }

    #[test]
    fn test_diagnostic_prefers_stderr() {
        let mut out = ProbeOutput {
            exit_code: Some(1),
            stdout: "partial".into(),
            stderr: "  ImportError: boom \n".into(),
            timed_out: false,
            duration: Duration::from_millis(5),
        };
        assert_eq!(out.diagnostic(), "ImportError: boom");

        out.stderr.clear();
        assert_eq!(out.diagnostic(), "partial");

        out.stdout.clear();
        assert_eq!(out.diagnostic(), "exited with code 1");
        assert!(!out.success());
    }
}
