//! Orchestration core: state store, session runner and the loop itself.

pub mod machine;
pub mod runner;
pub mod state;

pub use machine::{LoopOutcome, LoopPhase, Orchestrator};
pub use runner::{ClaudeRunner, SessionOutput, SessionRequest, SessionRunner};
pub use state::{ExecutionState, RunLock, SaveFault, StateStore};
