//! Project configuration file for storyloop.
//!
//! Reads `.storyloop/storyloop.toml`. Every section is optional and falls back
//! to defaults, so an empty or missing file is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [paths]
//! prds_dir = "prds"
//! state_file = "state.json"
//! history_file = "history.md"
//! standards = ".storyloop/standards.md"
//! prd_schema = ".storyloop/prd-schema.md"
//! log_dir = ".storyloop/logs"
//! test_file = "tests/test_{story_id}.py"
//! source_dirs = ["src"]
//! source_extensions = ["py"]
//!
//! [session]
//! command = "claude"
//! args = ["--print", "--model", "sonnet", "--dangerously-skip-permissions"]
//! timeout_secs = 3600
//! stream_output = true
//!
//! [verify]
//! command = "pytest"
//! args = ["{test_file}", "-v"]
//! timeout_secs = 600
//!
//! [context]
//! token_budget = 60000
//! chars_per_token = 4
//!
//! [commit]
//! enabled = true
//! author_name = "storyloop"
//! author_email = "storyloop@localhost"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration directory inside a project.
pub const CONFIG_DIR: &str = ".storyloop";
/// Name of the configuration file inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "storyloop.toml";

/// File and directory locations, relative to the project directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub prds_dir: PathBuf,
    pub state_file: PathBuf,
    pub history_file: PathBuf,
    pub standards: PathBuf,
    pub prd_schema: PathBuf,
    pub log_dir: PathBuf,
    /// Test artifact template; `{story_id}` is substituted.
    pub test_file: String,
    /// Directories scanned for existing source during implementation.
    pub source_dirs: Vec<PathBuf>,
    pub source_extensions: Vec<String>,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            prds_dir: PathBuf::from("prds"),
            state_file: PathBuf::from("state.json"),
            history_file: PathBuf::from("history.md"),
            standards: PathBuf::from(".storyloop/standards.md"),
            prd_schema: PathBuf::from(".storyloop/prd-schema.md"),
            log_dir: PathBuf::from(".storyloop/logs"),
            test_file: "tests/test_{story_id}.py".to_string(),
            source_dirs: vec![PathBuf::from("src")],
            source_extensions: vec!["py".to_string()],
        }
    }
}

/// External generation session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub command: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    /// Echo session output lines while capturing them.
    pub stream_output: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec![
                "--print".to_string(),
                "--model".to_string(),
                "sonnet".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            timeout_secs: 3600,
            stream_output: true,
        }
    }
}

/// External test runner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifySection {
    pub command: String,
    /// Arguments; `{test_file}` is substituted.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for VerifySection {
    fn default() -> Self {
        Self {
            command: "pytest".to_string(),
            args: vec!["{test_file}".to_string(), "-v".to_string()],
            timeout_secs: 600,
        }
    }
}

/// Soft size ceiling for assembled session context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub token_budget: usize,
    pub chars_per_token: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            token_budget: 60_000,
            chars_per_token: 4,
        }
    }
}

impl ContextSection {
    /// The budget expressed in characters.
    pub fn char_budget(&self) -> usize {
        self.token_budget.saturating_mul(self.chars_per_token)
    }
}

/// Commit side-effect settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitSection {
    pub enabled: bool,
    pub author_name: String,
    pub author_email: String,
}

impl Default for CommitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            author_name: "storyloop".to_string(),
            author_email: "storyloop@localhost".to_string(),
        }
    }
}

/// Root of `storyloop.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectToml {
    pub paths: PathsSection,
    pub session: SessionSection,
    pub verify: VerifySection,
    pub context: ContextSection,
    pub commit: CommitSection,
}

impl ProjectToml {
    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let toml: ProjectToml = toml::from_str(content).context("Failed to parse storyloop.toml")?;
        toml.validate()?;
        Ok(toml)
    }

    /// Load from `<project_dir>/.storyloop/storyloop.toml`, or defaults if absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = Self::path_in(project_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn path_in(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Apply environment overrides. `CLAUDE_CMD` replaces the session command.
    pub fn apply_env(&mut self) {
        if let Ok(cmd) = std::env::var("CLAUDE_CMD")
            && !cmd.trim().is_empty()
        {
            self.session.command = cmd;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.session.timeout_secs == 0 {
            anyhow::bail!("session.timeout_secs must be greater than 0");
        }
        if self.verify.timeout_secs == 0 {
            anyhow::bail!("verify.timeout_secs must be greater than 0");
        }
        if self.context.token_budget == 0 || self.context.chars_per_token == 0 {
            anyhow::bail!("context.token_budget and context.chars_per_token must be greater than 0");
        }
        if !self.paths.test_file.contains("{story_id}") {
            anyhow::bail!("paths.test_file must contain the {{story_id}} placeholder");
        }
        if self.session.command.trim().is_empty() || self.verify.command.trim().is_empty() {
            anyhow::bail!("session.command and verify.command must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_is_defaults() {
        let toml = ProjectToml::parse("").unwrap();
        assert_eq!(toml, ProjectToml::default());
        assert_eq!(toml.session.command, "claude");
        assert_eq!(toml.verify.args, vec!["{test_file}", "-v"]);
        assert_eq!(toml.context.char_budget(), 240_000);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let toml = ProjectToml::parse(
            r#"
            [verify]
            command = "cargo"
            args = ["test", "--test", "{test_file}"]

            [commit]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(toml.verify.command, "cargo");
        assert_eq!(toml.verify.timeout_secs, 600);
        assert!(!toml.commit.enabled);
        assert_eq!(toml.commit.author_name, "storyloop");
        assert_eq!(toml.paths.prds_dir, PathBuf::from("prds"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = ProjectToml::parse("[session]\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn test_test_file_needs_placeholder() {
        let err = ProjectToml::parse("[paths]\ntest_file = \"tests/test.py\"\n").unwrap_err();
        assert!(err.to_string().contains("{story_id}"));
    }

    #[test]
    fn test_malformed_toml_is_error() {
        assert!(ProjectToml::parse("[session\ncommand = ").is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let toml = ProjectToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml, ProjectToml::default());
    }

    #[test]
    fn test_load_from_project_dir() {
        let dir = tempdir().unwrap();
        let path = ProjectToml::path_in(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[context]\ntoken_budget = 100\n").unwrap();
        let toml = ProjectToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.context.token_budget, 100);
        assert_eq!(toml.context.char_budget(), 400);
    }
}
