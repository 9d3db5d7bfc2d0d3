//! Verification gate: the external test runner as the completion oracle.
//!
//! Exit code 0 is `Passed`, any other exit code is `Failed`. A runner that
//! never produces an exit code is an [`ExternalError`], not a test result.

mod summary;

pub use summary::TestSummary;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::errors::ExternalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Passed,
    Failed,
}

/// Result of one test-runner invocation.
#[derive(Debug, Clone)]
pub struct GateReport {
    pub outcome: GateOutcome,
    pub summary: TestSummary,
    /// Captured stdout followed by stderr, verbatim.
    pub output: String,
    pub exit_code: Option<i32>,
}

impl GateReport {
    pub fn passed(output: impl Into<String>) -> Self {
        Self::from_exit(Some(0), output.into())
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self::from_exit(Some(1), output.into())
    }

    fn from_exit(exit_code: Option<i32>, output: String) -> Self {
        let outcome = if exit_code == Some(0) {
            GateOutcome::Passed
        } else {
            GateOutcome::Failed
        };
        Self {
            outcome,
            summary: TestSummary::parse(&output),
            output,
            exit_code,
        }
    }

    pub fn is_passed(&self) -> bool {
        self.outcome == GateOutcome::Passed
    }
}

/// Runs the tests for one story's test artifact.
#[async_trait]
pub trait VerificationGate: Send + Sync {
    async fn run(&self, test_file: &Path) -> Result<GateReport, ExternalError>;
}

/// Gate backed by a configured test-runner command.
pub struct CommandGate {
    program: String,
    args: Vec<String>,
    project_dir: PathBuf,
    timeout: Duration,
}

impl CommandGate {
    /// `args` may contain `{test_file}`, replaced with the artifact path
    /// relative to `project_dir`.
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        project_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            project_dir: project_dir.into(),
            timeout,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        let verify = &config.toml().verify;
        Self::new(
            verify.command.clone(),
            verify.args.clone(),
            config.project_dir.clone(),
            config.verify_timeout(),
        )
    }

    fn render_args(&self, test_file: &Path) -> Vec<String> {
        let rel = test_file.strip_prefix(&self.project_dir).unwrap_or(test_file);
        let rel = rel.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{test_file}", &rel))
            .collect()
    }
}

#[async_trait]
impl VerificationGate for CommandGate {
    async fn run(&self, test_file: &Path) -> Result<GateReport, ExternalError> {
        let args = self.render_args(test_file);
        debug!(program = %self.program, ?args, "running test gate");

        let child = Command::new(&self.program)
            .args(&args)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExternalError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ExternalError::Io {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(ExternalError::Timeout {
                    program: self.program.clone(),
                    after: self.timeout,
                });
            }
        };

        let exit_code = output.status.code();
        if exit_code.is_none() {
            return Err(ExternalError::Killed {
                program: self.program.clone(),
            });
        }

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !captured.is_empty() && !captured.ends_with('\n') {
                captured.push('\n');
            }
            captured.push_str(&stderr);
        }

        let report = GateReport::from_exit(exit_code, captured);
        info!(
            outcome = ?report.outcome,
            summary = %report.summary,
            exit = ?exit_code,
            "test gate finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh_gate(script: &str, dir: &Path, secs: u64) -> CommandGate {
        CommandGate::new(
            "sh",
            vec!["-c".into(), script.into(), "gate".into(), "{test_file}".into()],
            dir,
            Duration::from_secs(secs),
        )
    }

    #[test]
    fn test_render_args_uses_relative_path() {
        let gate = CommandGate::new(
            "pytest",
            vec!["{test_file}".into(), "-v".into()],
            "/proj",
            Duration::from_secs(1),
        );
        assert_eq!(
            gate.render_args(Path::new("/proj/tests/test_US-001.py")),
            vec!["tests/test_US-001.py", "-v"]
        );
    }

    #[test]
    fn test_report_constructors() {
        assert!(GateReport::passed("1 passed").is_passed());
        let failed = GateReport::failed("2 failed");
        assert_eq!(failed.outcome, GateOutcome::Failed);
        assert_eq!(failed.summary.failed, Some(2));
    }

    #[tokio::test]
    async fn test_exit_zero_is_passed() {
        let dir = tempdir().unwrap();
        let gate = sh_gate("echo \"checking $1\"; echo '1 passed'", dir.path(), 10);
        let report = gate.run(&dir.path().join("tests/t.py")).await.unwrap();
        assert!(report.is_passed());
        assert!(report.output.contains("checking tests/t.py"));
        assert_eq!(report.summary.passed, Some(1));
    }

    #[tokio::test]
    async fn test_nonzero_is_failed_with_stderr_captured() {
        let dir = tempdir().unwrap();
        let gate = sh_gate("echo '1 failed'; echo boom >&2; exit 3", dir.path(), 10);
        let report = gate.run(&dir.path().join("t.py")).await.unwrap();
        assert_eq!(report.outcome, GateOutcome::Failed);
        assert_eq!(report.exit_code, Some(3));
        assert!(report.output.contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_is_external_error() {
        let dir = tempdir().unwrap();
        let gate = sh_gate("sleep 5", dir.path(), 1);
        let err = gate.run(&dir.path().join("t.py")).await.unwrap_err();
        assert!(matches!(err, ExternalError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempdir().unwrap();
        let gate = CommandGate::new(
            "storyloop-no-such-runner",
            vec![],
            dir.path(),
            Duration::from_secs(1),
        );
        let err = gate.run(&dir.path().join("t.py")).await.unwrap_err();
        assert!(matches!(err, ExternalError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_signal_kill_is_external_error() {
        let dir = tempdir().unwrap();
        let gate = sh_gate("kill -9 $$", dir.path(), 10);
        let err = gate.run(&dir.path().join("t.py")).await.unwrap_err();
        assert!(matches!(err, ExternalError::Killed { .. }));
    }
}
