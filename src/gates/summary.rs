use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static PASSED_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) passed").unwrap());
static FAILED_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) failed").unwrap());
static ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) errors?\b").unwrap());

/// Test counts scraped from runner output.
///
/// Counts come from the last occurrence in the output, which is where
/// pytest-style runners print their final tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub passed: Option<u32>,
    pub failed: Option<u32>,
    pub errors: Option<u32>,
}

impl TestSummary {
    pub fn parse(output: &str) -> Self {
        Self {
            passed: last_count(&PASSED_REGEX, output),
            failed: last_count(&FAILED_REGEX, output),
            errors: last_count(&ERROR_REGEX, output),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.passed.is_none() && self.failed.is_none() && self.errors.is_none()
    }
}

fn last_count(regex: &Regex, output: &str) -> Option<u32> {
    regex
        .captures_iter(output)
        .last()
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

impl fmt::Display for TestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no test summary");
        }
        let mut parts = Vec::new();
        if let Some(n) = self.passed {
            parts.push(format!("{} passed", n));
        }
        if let Some(n) = self.failed {
            parts.push(format!("{} failed", n));
        }
        if let Some(n) = self.errors {
            parts.push(format!("{} errors", n));
        }
        write!(f, "{}", parts.join(", "))
    }
}
