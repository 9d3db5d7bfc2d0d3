//! Signal parsing from session output.
//!
//! A marker is a line whose trimmed text starts with one of the fixed
//! keywords followed by a colon:
//! - `TESTS_GENERATED: <story-id>`
//! - `STORY_DONE: <story-id>`
//! - `BLOCKED: <reason>`
//!
//! Sessions narrate before they finish, so the last marker line wins.
//! Markers with an empty payload are ignored.

use super::types::SessionSignal;
use regex::Regex;
use std::sync::LazyLock;

static MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(TESTS_GENERATED|STORY_DONE|BLOCKED)\s*:\s*(.*?)\s*$").unwrap()
});

/// Parser for extracting the final outcome marker from session output.
pub struct SignalParser {
    verbose: bool,
}

impl SignalParser {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Extract the last recognized marker, or `NoSignal`.
    pub fn parse(&self, text: &str) -> SessionSignal {
        let signal = text
            .lines()
            .filter_map(parse_line)
            .last()
            .unwrap_or(SessionSignal::NoSignal);

        if self.verbose {
            tracing::debug!(%signal, "session signal parsed");
        }
        signal
    }
}

fn parse_line(line: &str) -> Option<SessionSignal> {
    let cap = MARKER_REGEX.captures(line)?;
    let keyword = cap.get(1)?.as_str();
    let payload = cap.get(2)?.as_str();
    if payload.is_empty() {
        return None;
    }

    match keyword {
        "TESTS_GENERATED" => Some(SessionSignal::TestsGenerated(first_token(payload))),
        "STORY_DONE" => Some(SessionSignal::StoryDone(first_token(payload))),
        "BLOCKED" => Some(SessionSignal::Blocked(payload.to_string())),
        _ => None,
    }
}

fn first_token(payload: &str) -> String {
    payload
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Convenience function to extract the final signal without creating a parser.
pub fn extract_signal(text: &str) -> SessionSignal {
    SignalParser::new(false).parse(text)
}
