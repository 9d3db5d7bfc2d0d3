//! Commit side effect for completed stories.

mod git;

pub use git::GitCommitter;

use crate::errors::ExternalError;
use crate::prd::{Story, story_prefix};

/// Records the working tree after a story completes.
pub trait Committer: Send + Sync {
    /// Stage everything and commit with `message`. Returns the short commit
    /// id, or `None` when nothing was committed.
    fn commit(&self, message: &str) -> Result<Option<String>, ExternalError>;
}

/// Committer used when commits are disabled in configuration.
pub struct NoCommit;

impl Committer for NoCommit {
    fn commit(&self, message: &str) -> Result<Option<String>, ExternalError> {
        tracing::debug!(message, "commits disabled; skipping");
        Ok(None)
    }
}

/// Conventional-commit type for a story id prefix.
pub fn commit_type(story_id: &str) -> &'static str {
    match story_prefix(story_id) {
        Some("BUG") => "fix",
        Some("DOC") => "docs",
        Some("CHORE") | Some("SPIKE") => "chore",
        Some("REFACTOR") | Some("DEBT") => "refactor",
        Some("TEST") => "test",
        _ => "feat",
    }
}

/// `<type>: <title> (<story-id>)` with the title's first letter lower-cased.
///
/// The rest of the title is kept as written, and a leading all-caps word
/// such as `API` is left alone.
pub fn commit_message(story: &Story) -> String {
    let title = story.title.trim();
    let description = if title.is_empty() {
        "completed story".to_string()
    } else if starts_with_acronym(title) {
        title.to_string()
    } else {
        let mut chars = title.chars();
        match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => String::new(),
        }
    };
    format!("{}: {} ({})", commit_type(&story.id), description, story.id)
}

fn starts_with_acronym(title: &str) -> bool {
    let first = title.split_whitespace().next().unwrap_or_default();
    let letters: Vec<char> = first.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() > 1 && letters.iter().all(|c| c.is_uppercase())
}
