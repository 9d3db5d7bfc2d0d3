//! Durable execution position.
//!
//! `ExecutionState` is the single source of truth for resumption. It is
//! written with temp-file + rename so a reader only ever observes a complete
//! prior state or a complete new state. One process writes at a time; `run`
//! holds a [`RunLock`] for the duration of the loop.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::prd::WorkItem;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub current_prd: Option<String>,
    pub current_story: Option<String>,
    #[serde(default)]
    pub completed_stories: Vec<String>,
    #[serde(default)]
    pub remaining_stories: Vec<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_count: u64,
    /// Story whose tests were observed failing before implementation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_verified_failing: Option<String>,
}

impl ExecutionState {
    /// Position at the start of a work item.
    ///
    /// Stories already flagged `passes` in the input start out completed;
    /// the rest are queued in priority order.
    pub fn start_work_item(&mut self, item: &WorkItem) {
        let mut completed = Vec::new();
        let mut remaining = Vec::new();
        for story in item.ordered_stories() {
            if story.passes {
                completed.push(story.id.clone());
            } else {
                remaining.push(story.id.clone());
            }
        }

        self.current_prd = Some(item.id.clone());
        self.current_story = remaining.first().cloned();
        self.completed_stories = completed;
        self.remaining_stories = remaining;
        self.tests_verified_failing = None;
    }

    /// Clear the position once the queue is empty. Completed ids of the last
    /// work item and the session counter are kept.
    pub fn clear_position(&mut self) {
        self.current_prd = None;
        self.current_story = None;
        self.remaining_stories.clear();
        self.tests_verified_failing = None;
    }

    /// Move a story from remaining to completed and select the next one.
    ///
    /// Completing an already-completed story is a no-op; a story the state
    /// has never seen is an error.
    pub fn mark_story_complete(&mut self, story_id: &str) -> Result<()> {
        if self.is_completed(story_id) {
            return Ok(());
        }
        let pos = self
            .remaining_stories
            .iter()
            .position(|id| id == story_id)
            .ok_or_else(|| anyhow!("Story {} is not in remaining_stories", story_id))?;

        self.remaining_stories.remove(pos);
        self.completed_stories.push(story_id.to_string());
        self.current_story = self.remaining_stories.first().cloned();
        if self.tests_verified_failing.as_deref() == Some(story_id) {
            self.tests_verified_failing = None;
        }
        Ok(())
    }

    pub fn is_completed(&self, story_id: &str) -> bool {
        self.completed_stories.iter().any(|id| id == story_id)
    }

    pub fn next_session(&mut self) -> u64 {
        self.session_count += 1;
        self.session_count
    }

    /// Check the state against its work item.
    ///
    /// completed ∪ remaining must equal the work item's stories, disjointly,
    /// and the current story must be the head of remaining.
    pub fn check_against(&self, item: &WorkItem) -> Result<()> {
        if self.current_prd.as_deref() != Some(item.id.as_str()) {
            bail!(
                "current_prd is {:?}, work item is {}",
                self.current_prd,
                item.id
            );
        }

        let all = item.story_ids();
        for id in self.completed_stories.iter().chain(&self.remaining_stories) {
            if !all.contains(id) {
                bail!("story {} is not part of {}", id, item.id);
            }
        }
        for id in &self.completed_stories {
            if self.remaining_stories.contains(id) {
                bail!("story {} is both completed and remaining", id);
            }
        }
        for id in &all {
            if !self.completed_stories.contains(id) && !self.remaining_stories.contains(id) {
                bail!("story {} is neither completed nor remaining", id);
            }
        }
        if self.current_story != self.remaining_stories.first().cloned() {
            bail!(
                "current_story {:?} is not the head of remaining_stories",
                self.current_story
            );
        }
        Ok(())
    }
}

/// Fault points for exercising crash behavior of [`StateStore::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFault {
    /// Fail after writing part of the temp file.
    MidWrite,
    /// Fail after the temp file is complete but before rename.
    BeforeRename,
    /// Fail after rename.
    AfterRename,
}

pub struct StateStore {
    state_file: PathBuf,
    fault: Option<SaveFault>,
}

impl StateStore {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
            fault: None,
        }
    }

    /// Store that fails at `fault` on every save. For crash-consistency tests.
    pub fn with_fault(state_file: impl Into<PathBuf>, fault: SaveFault) -> Self {
        Self {
            state_file: state_file.into(),
            fault: Some(fault),
        }
    }

    pub fn path(&self) -> &Path {
        &self.state_file
    }

    /// Load the persisted state, or `None` if there is no state file yet.
    pub fn load(&self) -> Result<Option<ExecutionState>> {
        if !self.state_file.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.state_file).context("Failed to read state file")?;
        let state: ExecutionState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.state_file.display()))?;
        debug!(
            prd = ?state.current_prd,
            story = ?state.current_story,
            sessions = state.session_count,
            "state loaded"
        );
        Ok(Some(state))
    }

    /// Persist `state` atomically, stamping `last_updated`.
    pub fn save(&self, state: &mut ExecutionState) -> Result<()> {
        state.last_updated = Some(Utc::now());
        let mut json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
        json.push('\n');

        let dir = match self.state_file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).context("Failed to create state directory")?;

        let mut tmp = NamedTempFile::new_in(dir).context("Failed to create temp state file")?;
        if self.fault == Some(SaveFault::MidWrite) {
            let half = &json.as_bytes()[..json.len() / 2];
            tmp.write_all(half).context("Failed to write temp state file")?;
            bail!("injected fault: crash mid-write");
        }
        tmp.write_all(json.as_bytes())
            .context("Failed to write temp state file")?;
        tmp.as_file()
            .sync_all()
            .context("Failed to sync temp state file")?;
        if self.fault == Some(SaveFault::BeforeRename) {
            bail!("injected fault: crash before rename");
        }

        tmp.persist(&self.state_file)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to replace {}", self.state_file.display()))?;
        if self.fault == Some(SaveFault::AfterRename) {
            bail!("injected fault: crash after rename");
        }

        debug!(path = %self.state_file.display(), "state saved");
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        if self.state_file.exists() {
            fs::remove_file(&self.state_file).context("Failed to remove state file")?;
        }
        Ok(())
    }
}

/// Exclusive advisory lock held while the loop runs.
pub struct RunLock {
    file: File,
}

impl RunLock {
    /// Take the lock or fail immediately if another process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create lock directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow!(
                "Another storyloop run holds {}; concurrent runs are not supported",
                path.display()
            )
        })?;
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
