//! Signal types emitted by generation sessions.

/// Outcome marker found in a session's output.
///
/// Exactly one is produced per output: the last marker line wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// `TESTS_GENERATED: <story-id>`
    TestsGenerated(String),
    /// `STORY_DONE: <story-id>`
    StoryDone(String),
    /// `BLOCKED: <reason>`
    Blocked(String),
    /// No recognized marker line.
    NoSignal,
}

impl std::fmt::Display for SessionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionSignal::TestsGenerated(id) => write!(f, "TESTS_GENERATED: {}", id),
            SessionSignal::StoryDone(id) => write!(f, "STORY_DONE: {}", id),
            SessionSignal::Blocked(reason) => write!(f, "BLOCKED: {}", reason),
            SessionSignal::NoSignal => write!(f, "no signal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_marker_text() {
        assert_eq!(
            SessionSignal::StoryDone("BUG-004".into()).to_string(),
            "STORY_DONE: BUG-004"
        );
        assert_eq!(SessionSignal::NoSignal.to_string(), "no signal");
    }
}
