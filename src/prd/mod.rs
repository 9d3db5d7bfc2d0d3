//! Work-item store: parsing, schema validation, and the on-disk queue.

mod queue;
mod types;

pub use queue::PrdQueue;
pub use types::{
    Complexity, STORY_PREFIXES, Story, WorkItem, WorkItemType, story_prefix,
};
