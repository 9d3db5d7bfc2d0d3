//! Append-only audit trail of story outcomes.

mod history;

pub use history::HistoryRecorder;

use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::time::Duration;

use crate::gates::TestSummary;

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryOutcome {
    Completed,
    Blocked { kind: String, reason: String },
}

/// One immutable history record.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub prd: Option<String>,
    pub story_id: Option<String>,
    pub story_title: Option<String>,
    /// Loop phase the entry was produced in.
    pub phase: String,
    pub outcome: HistoryOutcome,
    pub acceptance_criteria: Vec<String>,
    pub test_summary: Option<TestSummary>,
    pub commit: Option<String>,
    pub duration: Duration,
    pub session: u64,
    /// Captured session or test-runner output behind a block.
    pub diagnostic: Option<String>,
}

impl HistoryEntry {
    pub fn completed(prd: &str, story_id: &str, phase: &str) -> Self {
        Self::new(Some(prd), Some(story_id), phase, HistoryOutcome::Completed)
    }

    pub fn blocked(
        prd: Option<&str>,
        story_id: Option<&str>,
        phase: &str,
        kind: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            prd,
            story_id,
            phase,
            HistoryOutcome::Blocked {
                kind: kind.to_string(),
                reason: reason.into(),
            },
        )
    }

    fn new(prd: Option<&str>, story_id: Option<&str>, phase: &str, outcome: HistoryOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            prd: prd.map(str::to_string),
            story_id: story_id.map(str::to_string),
            story_title: None,
            phase: phase.to_string(),
            outcome,
            acceptance_criteria: Vec::new(),
            test_summary: None,
            commit: None,
            duration: Duration::ZERO,
            session: 0,
            diagnostic: None,
        }
    }

    /// Render as a markdown block terminated by a horizontal rule.
    pub fn to_markdown(&self) -> String {
        let story = self.story_id.as_deref().unwrap_or("-");
        let prd = self.prd.as_deref().unwrap_or("-");
        let stamp = self.timestamp.format("%Y-%m-%d %H:%M:%S UTC");

        let mut out = String::new();
        match &self.outcome {
            HistoryOutcome::Completed => {
                let _ = writeln!(out, "## {} - Story {} Complete\n", stamp, story);
            }
            HistoryOutcome::Blocked { .. } => {
                let _ = writeln!(out, "## {} - Story {} BLOCKED\n", stamp, story);
            }
        }

        let _ = writeln!(out, "- **PRD:** {}", prd);
        match &self.story_title {
            Some(title) => {
                let _ = writeln!(out, "- **Story:** {} - {}", story, title);
            }
            None => {
                let _ = writeln!(out, "- **Story:** {}", story);
            }
        }
        let _ = writeln!(out, "- **Phase:** {}", self.phase);
        let _ = writeln!(out, "- **Duration:** {}s", self.duration.as_secs());
        if let Some(summary) = &self.test_summary {
            let _ = writeln!(out, "- **Tests:** {}", summary);
        }
        if let Some(commit) = &self.commit {
            let _ = writeln!(out, "- **Commit:** {}", commit);
        }
        let _ = writeln!(out, "- **Session:** {}", self.session);
        if let HistoryOutcome::Blocked { kind, reason } = &self.outcome {
            let _ = writeln!(out, "- **Error:** {}", kind);
            let _ = writeln!(out, "- **Reason:** {}", reason);
        }
        out.push('\n');

        if matches!(self.outcome, HistoryOutcome::Completed) && !self.acceptance_criteria.is_empty()
        {
            out.push_str("### Acceptance Criteria Met\n");
            for ac in &self.acceptance_criteria {
                let _ = writeln!(out, "- [x] {}", ac);
            }
            out.push('\n');
        }

        if let (HistoryOutcome::Blocked { .. }, Some(diagnostic)) = (&self.outcome, &self.diagnostic)
        {
            // Indented code block: no output line can start a new "## " entry.
            out.push_str("### Diagnostic Output\n\n");
            for line in diagnostic.trim_end().lines() {
                let _ = writeln!(out, "    {}", line);
            }
            out.push('\n');
        }

        out.push_str("---\n\n");
        out
    }
}
