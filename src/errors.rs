//! Typed error hierarchy for the storyloop executor.
//!
//! Two enums cover the two failure surfaces:
//! - `ExternalError`: a spawned process (session, test runner, git) could not
//!   be run to completion
//! - `LoopError`: every reason the orchestration loop stops in `Blocked`
//!
//! `Block` wraps a `LoopError` with the position the loop was in when it
//! stopped, plus the captured diagnostic body that is printed to the operator.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::orchestrator::machine::LoopPhase;

/// Failures of an invoked external process.
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` timed out after {}s", after.as_secs())]
    Timeout { program: String, after: Duration },

    #[error("`{program}` was terminated by a signal")]
    Killed { program: String },

    #[error("`{program}` exited with code {code}")]
    Exit { program: String, code: i32 },

    #[error("I/O error talking to `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git: {0}")]
    Git(#[from] git2::Error),
}

/// Every terminal reason for a run to stop in `Blocked`.
///
/// The `Display` output is the one-line classification shown to the operator.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("malformed work item {}: {}", path.display(), issues.join("; "))]
    MalformedWorkItem { path: PathBuf, issues: Vec<String> },

    #[error("unknown session outcome: no recognized signal in {session} output")]
    SignalNotFound { session: String },

    #[error("test generation failed: expected {expected}, session reported {found}")]
    UnexpectedSignal { expected: String, found: String },

    #[error("test generation failed: test file {} was not created", path.display())]
    MissingTestArtifact { path: PathBuf },

    #[error("tests passing before implementation: {} (stubbed tests or pre-existing code)", test_file.display())]
    PrematureSuccess { test_file: PathBuf },

    #[error("implementation did not satisfy tests: {}", test_file.display())]
    ImplementationFailure { test_file: PathBuf },

    #[error("external process failure: {0}")]
    ExternalProcessFailure(#[from] ExternalError),

    #[error("persistence failure at {}: {source:#}", path.display())]
    PersistenceFailure {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("session blocked: {reason}")]
    SessionBlocked { reason: String },

    #[error("state does not match work item: {detail}")]
    StateMismatch { detail: String },
}

impl LoopError {
    /// Short machine-friendly name of the error class, used in history entries.
    pub fn kind(&self) -> &'static str {
        match self {
            LoopError::MalformedWorkItem { .. } => "MalformedWorkItem",
            LoopError::SignalNotFound { .. } => "SignalNotFound",
            LoopError::UnexpectedSignal { .. } => "UnexpectedSignal",
            LoopError::MissingTestArtifact { .. } => "MissingTestArtifact",
            LoopError::PrematureSuccess { .. } => "PrematureSuccess",
            LoopError::ImplementationFailure { .. } => "ImplementationFailure",
            LoopError::ExternalProcessFailure(_) => "ExternalProcessFailure",
            LoopError::PersistenceFailure { .. } => "PersistenceFailure",
            LoopError::SessionBlocked { .. } => "SessionBlocked",
            LoopError::StateMismatch { .. } => "StateMismatch",
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, source: anyhow::Error) -> Self {
        LoopError::PersistenceFailure {
            path: path.into(),
            source,
        }
    }
}

/// A terminal stop of the loop, with everything the operator needs to act on it.
#[derive(Debug)]
pub struct Block {
    pub error: LoopError,
    /// Phase the loop was in when the block happened.
    pub phase: LoopPhase,
    pub prd: Option<String>,
    pub story_id: Option<String>,
    /// Captured session output or test-runner stdout/stderr.
    pub diagnostic: Option<String>,
}

impl Block {
    pub fn new(error: LoopError, phase: LoopPhase) -> Self {
        Self {
            error,
            phase,
            prd: None,
            story_id: None,
            diagnostic: None,
        }
    }

    pub fn at(mut self, prd: Option<&str>, story_id: Option<&str>) -> Self {
        self.prd = prd.map(str::to_string);
        self.story_id = story_id.map(str::to_string);
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        if !diagnostic.trim().is_empty() {
            self.diagnostic = Some(diagnostic);
        }
        self
    }

    /// One-line classification, e.g. `[PrematureSuccess] tests passing before implementation: ...`.
    pub fn headline(&self) -> String {
        format!("[{}] {}", self.error.kind(), self.error)
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.headline())
    }
}
