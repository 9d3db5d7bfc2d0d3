use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::project_config::{CONFIG_DIR, ProjectToml};

/// Runtime configuration for storyloop.
///
/// Resolves the relative paths of [`ProjectToml`] against the project
/// directory and exposes the values the loop needs. Layering is
/// file → environment → CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub prds_dir: PathBuf,
    pub state_file: PathBuf,
    pub history_file: PathBuf,
    pub standards_file: PathBuf,
    pub prd_schema_file: PathBuf,
    pub log_dir: PathBuf,
    pub lock_file: PathBuf,
    pub verbose: bool,
    toml: ProjectToml,
}

impl Config {
    /// Load configuration for `project_dir`, reading `.storyloop/storyloop.toml` if present.
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let mut toml = ProjectToml::load_or_default(&project_dir)?;
        toml.apply_env();
        Ok(Self::from_toml(project_dir, toml, verbose))
    }

    /// Build from an already-parsed configuration. Paths are joined, not canonicalized.
    pub fn from_toml(project_dir: PathBuf, toml: ProjectToml, verbose: bool) -> Self {
        let paths = &toml.paths;
        Self {
            prds_dir: project_dir.join(&paths.prds_dir),
            state_file: project_dir.join(&paths.state_file),
            history_file: project_dir.join(&paths.history_file),
            standards_file: project_dir.join(&paths.standards),
            prd_schema_file: project_dir.join(&paths.prd_schema),
            log_dir: project_dir.join(&paths.log_dir),
            lock_file: project_dir.join(CONFIG_DIR).join("run.lock"),
            project_dir,
            verbose,
            toml,
        }
    }

    pub fn toml(&self) -> &ProjectToml {
        &self.toml
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        if let Some(parent) = self.lock_file.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        Ok(())
    }

    /// Test artifact path for a story, relative to the project directory.
    pub fn test_file_relative(&self, story_id: &str) -> PathBuf {
        PathBuf::from(self.toml.paths.test_file.replace("{story_id}", story_id))
    }

    /// Absolute test artifact path for a story.
    pub fn test_file_for(&self, story_id: &str) -> PathBuf {
        self.project_dir.join(self.test_file_relative(story_id))
    }

    pub fn source_dirs(&self) -> Vec<PathBuf> {
        self.toml
            .paths
            .source_dirs
            .iter()
            .map(|d| self.project_dir.join(d))
            .collect()
    }

    pub fn source_extensions(&self) -> &[String] {
        &self.toml.paths.source_extensions
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.session.timeout_secs)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.verify.timeout_secs)
    }

    pub fn context_char_budget(&self) -> usize {
        self.toml.context.char_budget()
    }

    pub fn commits_enabled(&self) -> bool {
        self.toml.commit.enabled
    }

    /// Display a path relative to the project directory when possible.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.project_dir).unwrap_or(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_config_defaults_resolve_in_project_dir() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.prds_dir, root.join("prds"));
        assert_eq!(config.state_file, root.join("state.json"));
        assert_eq!(config.history_file, root.join("history.md"));
        assert_eq!(config.lock_file, root.join(".storyloop/run.lock"));
        assert_eq!(config.session_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn test_test_file_substitutes_story_id() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        assert_eq!(
            config.test_file_relative("US-001"),
            PathBuf::from("tests/test_US-001.py")
        );
        assert!(config.test_file_for("US-001").is_absolute());
        assert_eq!(
            config.relative(&config.test_file_for("US-001")),
            Path::new("tests/test_US-001.py")
        );
    }

    #[test]
    fn test_config_reads_toml_overrides() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".storyloop")).unwrap();
        fs::write(
            dir.path().join(".storyloop/storyloop.toml"),
            "[paths]\nstate_file = \".storyloop/state.json\"\n",
        )
        .unwrap();
        let config = Config::new(dir.path().to_path_buf(), true).unwrap();
        assert!(config.verbose);
        assert!(config.state_file.ends_with(".storyloop/state.json"));
    }

    #[test]
    fn test_config_invalid_toml_is_error() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".storyloop")).unwrap();
        fs::write(dir.path().join(".storyloop/storyloop.toml"), "[verify]\ntimeout_secs = 0\n")
            .unwrap();
        assert!(Config::new(dir.path().to_path_buf(), false).is_err());
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.log_dir.exists());
        assert!(config.lock_file.parent().unwrap().exists());
    }
}
