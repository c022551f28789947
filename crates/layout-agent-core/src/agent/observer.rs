//! Host-facing callbacks
//!
//! Callbacks may run on any thread, including Tokio worker threads. Hosts
//! with a UI thread must marshal onto it themselves; [`ChannelObserver`]
//! does that by forwarding everything into a channel the UI loop drains.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::mpsc;
use tracing::warn;

use super::state::UiState;
use crate::payload::Segment;

/// Receives status text, streamed deltas and derived UI state
pub trait AgentObserver: Send + Sync {
    fn on_status(&self, _text: &str) {}
    fn on_delta(&self, _delta: &str) {}
    fn on_ui_state(&self, _state: UiState) {}
}

/// Observer notification as a value
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Status(String),
    Delta(String),
    UiState(UiState),
}

/// Forwards notifications into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AgentObserver for ChannelObserver {
    fn on_status(&self, text: &str) {
        let _ = self.tx.send(AgentEvent::Status(text.to_string()));
    }

    fn on_delta(&self, delta: &str) {
        let _ = self.tx.send(AgentEvent::Delta(delta.to_string()));
    }

    fn on_ui_state(&self, state: UiState) {
        let _ = self.tx.send(AgentEvent::UiState(state));
    }
}

/// Materializes parsed segments in the host drawing
pub trait DrawSink {
    /// Create one line per segment at `layout_z`; returns how many were created
    fn draw_segments(&self, segments: &[Segment], layout_z: f64) -> anyhow::Result<usize>;
}

/// Run a host callback, logging and swallowing a panic
pub(crate) fn notify(what: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("{} callback panicked, ignoring", what);
    }
}
