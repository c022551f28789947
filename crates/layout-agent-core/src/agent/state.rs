//! State types for the run state machine

use thiserror::Error;

use crate::payload::Segment;

/// Lifecycle of the single interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// No pending work, no run active
    #[default]
    Idle,
    /// A selection is staged and waits for confirmation
    PendingConfirm,
    /// A model call is in flight
    Running,
}

/// Operator actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Select,
    Confirm,
    Cancel,
    Draw,
}

/// Which actions the UI should enable, derived from state and result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiState {
    pub state: RunState,
    pub can_select: bool,
    pub can_confirm: bool,
    pub can_cancel: bool,
    pub can_draw: bool,
}

impl UiState {
    pub fn derive(state: RunState, has_drawable_output: bool) -> Self {
        Self {
            state,
            can_select: state != RunState::Running,
            can_confirm: state == RunState::PendingConfirm,
            can_cancel: state != RunState::Idle,
            can_draw: state == RunState::Idle && has_drawable_output,
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Select => self.can_select,
            Action::Confirm => self.can_confirm,
            Action::Cancel => self.can_cancel,
            Action::Draw => self.can_draw,
        }
    }
}

/// Query staged by a selection, waiting for confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct PendingQuery {
    pub text: String,
    /// Opaque level tag carried through to drawing
    pub layout_z: f64,
}

impl PendingQuery {
    pub fn new(text: impl Into<String>, layout_z: f64) -> Self {
        Self {
            text: text.into(),
            layout_z,
        }
    }
}

/// Most recent successfully parsed answer
#[derive(Debug, Clone, PartialEq)]
pub struct LastResult {
    pub segments: Vec<Segment>,
    pub layout_z: f64,
}

/// Generation number identifying one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

/// Why an action was refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("a run is in progress, wait for it to finish or cancel it.")]
    RunInProgress,

    #[error("nothing is waiting for confirmation, select elements first.")]
    NothingPending,

    #[error("no main beams to draw, run the model first.")]
    NothingToDraw,

    #[error("no elements selected.")]
    EmptySelection,

    #[error("drawing failed: {0}")]
    DrawFailed(String),

    #[error("no async runtime is available to run the model call.")]
    NoRuntime,
}
