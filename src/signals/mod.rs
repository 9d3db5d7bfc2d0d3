//! Session signal protocol.
//!
//! Generation sessions report their outcome with marker lines:
//!
//! - `TESTS_GENERATED: US-001` - test artifact written for the story
//! - `STORY_DONE: US-001` - implementation finished
//! - `BLOCKED: <reason>` - the session cannot proceed
//!
//! Anything else is `NoSignal`, which the loop treats as a block.

mod parser;
mod types;

pub use parser::{SignalParser, extract_signal};
pub use types::SessionSignal;
