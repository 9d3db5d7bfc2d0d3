//! The work-item queue: `prds/*.json`, processed in file-name order.

use anyhow::{Context, Result, anyhow};
use glob::glob;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::types::WorkItem;
use crate::errors::LoopError;

pub struct PrdQueue {
    prds_dir: PathBuf,
}

impl PrdQueue {
    pub fn new(prds_dir: impl Into<PathBuf>) -> Self {
        Self {
            prds_dir: prds_dir.into(),
        }
    }

    pub fn prds_dir(&self) -> &Path {
        &self.prds_dir
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.prds_dir.join("archive")
    }

    pub fn path_of(&self, prd: &str) -> PathBuf {
        self.prds_dir.join(prd)
    }

    /// Queued work-item file names, sorted. The archive directory is not scanned.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.prds_dir.exists() {
            return Ok(Vec::new());
        }

        let pattern = self.prds_dir.join("*.json").to_string_lossy().to_string();
        let mut names: Vec<String> = glob(&pattern)
            .context("Failed to read glob pattern")?
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file())
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect();
        names.sort();
        Ok(names)
    }

    /// First queued work item, if any.
    pub fn next(&self) -> Result<Option<String>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Load and schema-check a queued work item.
    pub fn load(&self, prd: &str) -> Result<WorkItem, LoopError> {
        let path = self.path_of(prd);
        let content = fs::read_to_string(&path).map_err(|e| LoopError::MalformedWorkItem {
            path: path.clone(),
            issues: vec![format!("cannot read file: {}", e)],
        })?;

        let item = WorkItem::from_json(prd, &content).map_err(|e| LoopError::MalformedWorkItem {
            path: path.clone(),
            issues: vec![format!("invalid JSON: {}", e)],
        })?;

        let issues = item.validate();
        if !issues.is_empty() {
            return Err(LoopError::MalformedWorkItem { path, issues });
        }

        debug!(prd, stories = item.user_stories.len(), "work item loaded");
        Ok(item)
    }

    /// Load every queued work item, failing on the first malformed one.
    pub fn validate_all(&self) -> Result<Vec<WorkItem>, LoopError> {
        let names = self
            .list()
            .map_err(|e| LoopError::persistence(&self.prds_dir, e))?;
        names.iter().map(|name| self.load(name)).collect()
    }

    /// Move a finished work item into `archive/`.
    ///
    /// The copy is verified before the original is removed, and removed again if
    /// anything after the copy fails, so the file always exists in at least one place.
    pub fn archive(&self, prd: &str) -> Result<PathBuf> {
        let source = self.path_of(prd);
        if !source.exists() {
            return Err(anyhow!("Source work item not found: {}", source.display()));
        }

        let archive_dir = self.archive_dir();
        fs::create_dir_all(&archive_dir).context("Failed to create archive directory")?;

        let target = archive_dir.join(prd);
        fs::copy(&source, &target)
            .with_context(|| format!("Failed to copy {} to archive", source.display()))?;

        let verify = || -> Result<()> {
            let source_len = fs::metadata(&source)?.len();
            let target_len = fs::metadata(&target)?.len();
            if source_len != target_len {
                return Err(anyhow!(
                    "Archive copy size mismatch: {} != {}",
                    source_len,
                    target_len
                ));
            }
            fs::remove_file(&source).context("Failed to delete original after archiving")?;
            Ok(())
        };

        if let Err(e) = verify() {
            let _ = fs::remove_file(&target);
            return Err(e);
        }

        info!(prd, archive = %target.display(), "work item archived");
        Ok(target)
    }
}
