//! Context assembly for generation sessions.
//!
//! A bundle is a list of titled sections. Required sections (story id,
//! acceptance criteria, test file content) are never cut. When the rendered
//! bundle exceeds the character budget, optional sections are shortened or
//! omitted starting from the lowest priority.

mod assembler;
mod prompts;

pub use assembler::{ContextAssembler, extract_testing_section};
pub use prompts::render_prompt;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::util::truncate_at_char_boundary;

/// Which generation session a bundle is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    TestGeneration,
    Implementation,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::TestGeneration => "test-generation",
            SessionKind::Implementation => "implementation",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    pub body: String,
    pub required: bool,
    /// Optional sections with lower priority are cut first.
    pub priority: u8,
}

impl Section {
    pub fn required(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            required: true,
            priority: u8::MAX,
        }
    }

    pub fn optional(title: impl Into<String>, body: impl Into<String>, priority: u8) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            required: false,
            priority,
        }
    }

    fn render(&self) -> String {
        format!("=== {} ===\n{}\n\n", self.title, self.body.trim_end())
    }
}

/// Bounded input for one session.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    pub kind: SessionKind,
    pub story_id: String,
    pub sections: Vec<Section>,
    /// Titles of optional sections shortened or omitted to fit the budget.
    pub trimmed: Vec<String>,
}

impl ContextBundle {
    pub fn new(kind: SessionKind, story_id: impl Into<String>, sections: Vec<Section>) -> Self {
        Self {
            kind,
            story_id: story_id.into(),
            sections,
            trimmed: Vec::new(),
        }
    }

    pub fn render(&self) -> String {
        self.sections.iter().map(Section::render).collect()
    }

    pub fn char_len(&self) -> usize {
        self.sections.iter().map(|s| s.render().len()).sum()
    }

    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.title == title)
    }

    /// Shrink optional sections until the rendered bundle fits `budget`.
    ///
    /// If the required sections alone exceed the budget, every optional
    /// section is omitted and the bundle is left over budget.
    pub fn fit_to_budget(&mut self, budget: usize) {
        let mut total = self.char_len();
        if total <= budget {
            return;
        }

        let mut order: Vec<usize> = (0..self.sections.len())
            .filter(|&i| !self.sections[i].required)
            .collect();
        order.sort_by_key(|&i| self.sections[i].priority);

        for i in order {
            if total <= budget {
                break;
            }
            let overflow = total - budget;
            let section = &mut self.sections[i];
            let before = section.render().len();

            let body_len = section.body.len();
            let keep = body_len.saturating_sub(overflow + TRUNCATION_MARKER_ROOM);
            if keep == 0 {
                section.body = format!("[omitted: {} chars over context budget]", body_len);
            } else {
                let cut = body_len - keep;
                let kept = truncate_at_char_boundary(&section.body, keep).to_string();
                section.body = format!("{}\n[... truncated {} chars]", kept, cut);
            }

            let after = section.render().len();
            total = total - before + after;
            self.trimmed.push(section.title.clone());
        }

        if total > budget {
            tracing::warn!(
                story = %self.story_id,
                kind = %self.kind,
                total,
                budget,
                "required context alone exceeds budget"
            );
        }
    }
}

/// Space reserved for the truncation marker line.
const TRUNCATION_MARKER_ROOM: usize = 48;

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> ContextBundle {
        ContextBundle::new(
            SessionKind::Implementation,
            "US-001",
            vec![
                Section::required("CURRENT STORY", "Story ID: US-001\n- AC one"),
                Section::optional("STANDARDS", "s".repeat(400), 2),
                Section::optional("EXISTING SOURCE", "x".repeat(400), 1),
                Section::required("GENERATED TESTS", "def test_x(): assert False"),
            ],
        )
    }

    #[test]
    fn test_render_titles_in_order() {
        let text = bundle().render();
        let story = text.find("=== CURRENT STORY ===").unwrap();
        let tests = text.find("=== GENERATED TESTS ===").unwrap();
        assert!(story < tests);
    }

    #[test]
    fn test_within_budget_is_untouched() {
        let mut b = bundle();
        let before = b.render();
        b.fit_to_budget(10_000);
        assert_eq!(b.render(), before);
        assert!(b.trimmed.is_empty());
    }

    #[test]
    fn test_lowest_priority_cut_first() {
        let mut b = bundle();
        let budget = b.char_len() - 100;
        b.fit_to_budget(budget);
        assert!(b.char_len() <= budget);
        assert_eq!(b.trimmed, vec!["EXISTING SOURCE"]);
        assert!(b.section("EXISTING SOURCE").unwrap().body.contains("truncated"));
        assert_eq!(b.section("STANDARDS").unwrap().body, "s".repeat(400));
    }

    #[test]
    fn test_required_sections_never_cut() {
        let mut b = bundle();
        b.fit_to_budget(10);
        assert_eq!(
            b.section("CURRENT STORY").unwrap().body,
            "Story ID: US-001\n- AC one"
        );
        assert_eq!(
            b.section("GENERATED TESTS").unwrap().body,
            "def test_x(): assert False"
        );
        assert!(b.section("STANDARDS").unwrap().body.starts_with("[omitted"));
        assert_eq!(b.trimmed.len(), 2);
    }

    #[test]
    fn test_session_kind_display() {
        assert_eq!(SessionKind::TestGeneration.to_string(), "test-generation");
        assert_eq!(SessionKind::Implementation.as_str(), "implementation");
    }
}
