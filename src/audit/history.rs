use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::HistoryEntry;

const HEADER: &str = "# Storyloop Execution History\n\n\
This file is an append-only audit trail. It is never read during execution.\n\n\
---\n\n";

/// Appends entries to the history file. Prior bytes are never rewritten.
pub struct HistoryRecorder {
    history_file: PathBuf,
}

impl HistoryRecorder {
    pub fn new(history_file: impl Into<PathBuf>) -> Self {
        Self {
            history_file: history_file.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.history_file
    }

    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        if let Some(parent) = self.history_file.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Failed to create history directory")?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_file)
            .with_context(|| format!("Failed to open {}", self.history_file.display()))?;

        let mut block = String::new();
        // Opened in append mode, so a zero length means we created it.
        if file.metadata().map(|m| m.len() == 0).unwrap_or(false) {
            block.push_str(HEADER);
        }
        block.push_str(&entry.to_markdown());

        file.write_all(block.as_bytes())
            .context("Failed to append history entry")?;
        file.flush().context("Failed to flush history file")?;

        debug!(story = ?entry.story_id, outcome = ?entry.outcome, "history entry appended");
        Ok(())
    }

    /// Number of entries in the history file; zero if it does not exist.
    pub fn count_entries(&self) -> Result<usize> {
        if !self.history_file.exists() {
            return Ok(0);
        }
        let content =
            fs::read_to_string(&self.history_file).context("Failed to read history file")?;
        Ok(content.lines().filter(|l| l.starts_with("## ")).count())
    }
}
