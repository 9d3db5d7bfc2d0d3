//! Work-item (PRD) and story types.
//!
//! A work item is a JSON document queued under `prds/`. The orchestration
//! core never writes it back; story completion lives in the execution state
//! and is projected onto the stories with [`WorkItem::with_completion`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Story id prefixes accepted in `{PREFIX}-{NNN}` identifiers.
pub const STORY_PREFIXES: &[&str] = &[
    "US", "BUG", "ENH", "SPIKE", "CHORE", "DEBT", "REFACTOR", "DOC", "TEST",
];

static STORY_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]+)-(\d{3})$").unwrap());

/// Kind of requested work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkItemType {
    Feature,
    Bug,
    Enhancement,
    Spike,
    Chore,
    TechDebt,
}

impl std::fmt::Display for WorkItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkItemType::Feature => "feature",
            WorkItemType::Bug => "bug",
            WorkItemType::Enhancement => "enhancement",
            WorkItemType::Spike => "spike",
            WorkItemType::Chore => "chore",
            WorkItemType::TechDebt => "tech-debt",
        };
        write!(f, "{}", s)
    }
}

/// Advisory size estimate. Never affects scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[default]
    #[serde(alias = "medium")]
    Moderate,
    Complex,
}

/// A single testable unit of behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub priority: i64,
    #[serde(default)]
    pub complexity: Complexity,
    /// Completion flag. Only ever moves from `false` to `true`.
    #[serde(default)]
    pub passes: bool,
}

impl Story {
    /// The `PREFIX` part of `PREFIX-NNN`, if the id is well formed.
    pub fn prefix(&self) -> Option<&str> {
        story_prefix(&self.id)
    }
}

/// Returns the prefix of a well-formed story id.
pub fn story_prefix(id: &str) -> Option<&str> {
    STORY_ID_REGEX
        .captures(id)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|p| STORY_PREFIXES.contains(p))
}

/// A declarative unit of requested work, as read from `prds/<file>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    /// File name inside the queue directory. Not part of the JSON document.
    #[serde(skip)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WorkItemType,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub user_stories: Vec<Story>,
}

impl WorkItem {
    /// Parse a work item from JSON without validating it.
    pub fn from_json(id: impl Into<String>, json: &str) -> Result<Self, serde_json::Error> {
        let mut item: WorkItem = serde_json::from_str(json)?;
        item.id = id.into();
        Ok(item)
    }

    /// Schema checks beyond what serde enforces. Returns every issue found.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.name.trim().is_empty() {
            issues.push("work item name is empty".to_string());
        }
        if self.user_stories.is_empty() {
            issues.push("userStories must contain at least one story".to_string());
        }

        let mut seen = HashSet::new();
        for (idx, story) in self.user_stories.iter().enumerate() {
            let label = if story.id.is_empty() {
                format!("story #{}", idx + 1)
            } else {
                story.id.clone()
            };

            if story_prefix(&story.id).is_none() {
                issues.push(format!(
                    "{}: id must match PREFIX-NNN with PREFIX one of {}",
                    label,
                    STORY_PREFIXES.join(", ")
                ));
            }
            if !seen.insert(story.id.as_str()) {
                issues.push(format!("{}: duplicate story id", label));
            }
            if story.title.trim().is_empty() {
                issues.push(format!("{}: title is empty", label));
            }
            if story.acceptance_criteria.is_empty() {
                issues.push(format!("{}: acceptanceCriteria must not be empty", label));
            }
            for (n, criterion) in story.acceptance_criteria.iter().enumerate() {
                if criterion.trim().is_empty() {
                    issues.push(format!("{}: acceptance criterion #{} is empty", label, n + 1));
                }
            }
        }

        issues
    }

    pub fn story(&self, id: &str) -> Option<&Story> {
        self.user_stories.iter().find(|s| s.id == id)
    }

    /// Stories in execution order: ascending priority, ties in input order.
    pub fn ordered_stories(&self) -> Vec<&Story> {
        let mut stories: Vec<&Story> = self.user_stories.iter().collect();
        stories.sort_by_key(|s| s.priority);
        stories
    }

    pub fn story_ids(&self) -> Vec<String> {
        self.user_stories.iter().map(|s| s.id.clone()).collect()
    }

    /// Copy of this work item with `passes` set for every id in `completed`.
    ///
    /// Flags already `true` in the source are kept; nothing is ever cleared.
    pub fn with_completion(&self, completed: &[String]) -> WorkItem {
        let mut item = self.clone();
        for story in &mut item.user_stories {
            if completed.iter().any(|id| id == &story.id) {
                story.passes = true;
            }
        }
        item
    }
}
