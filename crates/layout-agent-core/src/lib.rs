//! Layout Agent Core - model-assisted main beam layout for CAD hosts
//!
//! This crate provides everything between the host's selection and the
//! host's drawing transaction:
//! - Settings resolution (environment first, config file second)
//! - Dify chat-messages client, streaming (SSE) and blocking
//! - Extraction of the first JSON object from free-form model output
//! - The Select / Confirm / Cancel / Draw run state machine
//!
//! Ribbon registration, element picking and geometry creation belong to
//! the host and reach this crate through the [`agent::AgentObserver`] and
//! [`agent::DrawSink`] traits.

pub mod agent;
pub mod ai;
pub mod constants;
pub mod level;
pub mod paths;
pub mod payload;
pub mod selection;
pub mod settings;

// Re-exports for convenience
pub use agent::{
    Action, ActionError, AgentObserver, DrawSink, LastResult, LayoutAgent, PendingQuery,
    RunOutcome, RunState, UiState,
};
pub use ai::client::{ChatBackend, ChatError, ChatReply, DifyClient};
pub use payload::{extract_first_json_object, parse_main_beams, Point2D, Segment};
pub use selection::SelectionSummary;
pub use settings::{EnvSettings, Settings, SettingsProvider, StaticSettings};
