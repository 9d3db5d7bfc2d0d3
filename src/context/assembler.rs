use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{ContextBundle, Section, SessionKind};
use crate::config::Config;
use crate::errors::LoopError;
use crate::prd::{Story, WorkItem};

/// Builds session context from the work item, policy documents, the test
/// artifact and existing source.
pub struct ContextAssembler {
    project_dir: PathBuf,
    standards_file: PathBuf,
    prd_schema_file: PathBuf,
    source_dirs: Vec<PathBuf>,
    source_extensions: Vec<String>,
    char_budget: usize,
}

impl ContextAssembler {
    pub fn from_config(config: &Config) -> Self {
        Self {
            project_dir: config.project_dir.clone(),
            standards_file: config.standards_file.clone(),
            prd_schema_file: config.prd_schema_file.clone(),
            source_dirs: config.source_dirs(),
            source_extensions: config.source_extensions().to_vec(),
            char_budget: config.context_char_budget(),
        }
    }

    pub fn with_budget(mut self, char_budget: usize) -> Self {
        self.char_budget = char_budget;
        self
    }

    /// Assemble the bundle for `kind`. `item` should already carry projected
    /// completion flags.
    pub fn assemble(
        &self,
        kind: SessionKind,
        item: &WorkItem,
        story: &Story,
        test_file: &Path,
    ) -> Result<ContextBundle, LoopError> {
        let sections = match kind {
            SessionKind::TestGeneration => self.test_generation_sections(item, story, test_file),
            SessionKind::Implementation => self.implementation_sections(item, story, test_file)?,
        };

        let mut bundle = ContextBundle::new(kind, story.id.clone(), sections);
        bundle.fit_to_budget(self.char_budget);
        debug!(
            story = %story.id,
            %kind,
            chars = bundle.char_len(),
            trimmed = ?bundle.trimmed,
            "context assembled"
        );
        Ok(bundle)
    }

    fn test_generation_sections(
        &self,
        item: &WorkItem,
        story: &Story,
        test_file: &Path,
    ) -> Vec<Section> {
        let mut sections = vec![Section::required(
            "CURRENT STORY",
            self.story_block(item, story, test_file),
        )];

        let slice = serde_json::to_string_pretty(story).unwrap_or_default();
        sections.push(Section::optional(
            "WORK ITEM",
            format!(
                "Type: {}\nName: {}\nDescription: {}\n\nStory:\n{}",
                item.kind, item.name, item.description, slice
            ),
            3,
        ));

        if let Some(schema) = read_optional(&self.prd_schema_file) {
            sections.push(Section::optional("PRD SCHEMA", schema, 2));
        }
        if let Some(standards) = read_optional(&self.standards_file) {
            sections.push(Section::optional(
                "TESTING STANDARDS",
                extract_testing_section(&standards),
                1,
            ));
        }
        sections
    }

    fn implementation_sections(
        &self,
        item: &WorkItem,
        story: &Story,
        test_file: &Path,
    ) -> Result<Vec<Section>, LoopError> {
        let tests = fs::read_to_string(test_file).map_err(|_| LoopError::MissingTestArtifact {
            path: test_file.to_path_buf(),
        })?;

        let mut sections = vec![
            Section::required("CURRENT STORY", self.story_block(item, story, test_file)),
            Section::required("GENERATED TESTS", tests.clone()),
        ];

        let full = serde_json::to_string_pretty(item).unwrap_or_default();
        sections.push(Section::optional(
            format!("WORK ITEM ({})", item.id),
            full,
            3,
        ));
        if let Some(standards) = read_optional(&self.standards_file) {
            sections.push(Section::optional("STANDARDS", standards, 2));
        }

        let sources = self.relevant_sources(&tests, test_file);
        if !sources.is_empty() {
            let mut body = String::new();
            for (path, content) in sources {
                body.push_str(&format!("--- {} ---\n{}\n", path.display(), content.trim_end()));
            }
            sections.push(Section::optional("EXISTING SOURCE", body, 1));
        }
        Ok(sections)
    }

    fn story_block(&self, item: &WorkItem, story: &Story, test_file: &Path) -> String {
        let rel = test_file.strip_prefix(&self.project_dir).unwrap_or(test_file);
        let mut out = format!(
            "Work item: {} ({}) - {}\nStory ID: {}\nTitle: {}\n",
            item.id, item.kind, item.name, story.id, story.title
        );
        if !story.description.trim().is_empty() {
            out.push_str(&format!("Description: {}\n", story.description.trim()));
        }
        out.push_str(&format!("Test file: {}\n\nAcceptance criteria:\n", rel.display()));
        for (i, ac) in story.acceptance_criteria.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, ac));
        }
        out
    }

    /// Source files under the configured directories, those whose stem the
    /// test file mentions first, then by path.
    fn relevant_sources(&self, tests: &str, test_file: &Path) -> Vec<(PathBuf, String)> {
        let mut files: Vec<(bool, PathBuf, String)> = Vec::new();

        for dir in &self.source_dirs {
            if !dir.is_dir() {
                continue;
            }
            let walker = WalkDir::new(dir)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| !is_skipped_dir(e.file_name().to_str().unwrap_or("")));
            for entry in walker.filter_map(|e| e.ok()) {
                let path = entry.path();
                if !entry.file_type().is_file() || path == test_file {
                    continue;
                }
                let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
                if !self.source_extensions.iter().any(|x| x == ext) {
                    continue;
                }
                let Ok(content) = fs::read_to_string(path) else {
                    continue;
                };
                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
                let mentioned = !stem.is_empty() && stem != "__init__" && tests.contains(stem);
                let rel = path
                    .strip_prefix(&self.project_dir)
                    .unwrap_or(path)
                    .to_path_buf();
                files.push((mentioned, rel, content));
            }
        }

        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        files.into_iter().map(|(_, p, c)| (p, c)).collect()
    }
}

fn is_skipped_dir(name: &str) -> bool {
    (name.len() > 1 && name.starts_with('.'))
        || matches!(name, "__pycache__" | "node_modules" | "target" | "venv")
}

fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unreadable policy document");
            None
        }
    }
}

/// The testing-related parts of a markdown standards document.
///
/// A heading containing "test" opens a section that runs until the next
/// heading of the same or a higher level. Fenced code is never read as a
/// heading. Falls back to the whole document when nothing matches.
pub fn extract_testing_section(content: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut in_section = false;
    let mut section_level = 0;
    let mut in_fence = false;

    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            if in_section {
                kept.push(line);
            }
            continue;
        }

        if !in_fence && line.starts_with('#') {
            let level = line.len() - line.trim_start_matches('#').len();
            if line.to_lowercase().contains("test") {
                in_section = true;
                section_level = level;
                kept.push(line);
            } else if in_section && level <= section_level {
                in_section = false;
            } else if in_section {
                kept.push(line);
            }
        } else if in_section {
            kept.push(line);
        }
    }

    if kept.is_empty() {
        content.to_string()
    } else {
        kept.join("\n")
    }
}
