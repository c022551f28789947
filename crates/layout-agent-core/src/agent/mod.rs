//! Run state machine
//!
//! Owns the staged query, the in-flight run handle and the last parsed
//! result behind a single mutex, and decides which of Select / Confirm /
//! Cancel / Draw is valid at any moment.

mod handler;
mod observer;
mod state;

#[cfg(test)]
mod agent_tests;

pub use handler::{LayoutAgent, RunOutcome};
pub use observer::{AgentEvent, AgentObserver, ChannelObserver, DrawSink};
pub use state::{Action, ActionError, LastResult, PendingQuery, RunId, RunState, UiState};
