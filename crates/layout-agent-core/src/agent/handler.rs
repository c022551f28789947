//! The LayoutAgent state machine
//!
//! All shared state lives in one struct behind one mutex. Only transition
//! bookkeeping happens under the lock; the model call runs in its own task.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::observer::{notify, AgentObserver, DrawSink};
use super::state::{ActionError, LastResult, PendingQuery, RunId, RunState, UiState};
use crate::ai::client::{ChatBackend, ChatError, ChatReply};
use crate::payload::{main_beams_from_answer, MainBeams, Segment};
use crate::selection::SelectionSummary;

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Main beams were parsed and stored for drawing
    Parsed { segments: usize },
    /// The answer contained no JSON object
    NoPayload,
    /// The JSON object had no usable `main_beams`
    NoMainBeams,
    /// The JSON object could not be decoded
    InvalidPayload(String),
    /// Configuration, HTTP, transport or protocol failure, or a panic
    Failed(String),
    /// Cancelled or superseded; nothing was stored
    Cancelled,
}

/// Ownership token of the in-flight run
#[derive(Debug, Clone)]
struct RunHandle {
    id: RunId,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Shared {
    state: RunState,
    pending: Option<PendingQuery>,
    run: Option<RunHandle>,
    last_result: Option<LastResult>,
    next_run_id: u64,
}

impl Shared {
    fn has_drawable_output(&self) -> bool {
        self.last_result
            .as_ref()
            .is_some_and(|r| !r.segments.is_empty())
    }

    fn ui_state(&self) -> UiState {
        UiState::derive(self.state, self.has_drawable_output())
    }

    fn is_current(&self, id: RunId) -> bool {
        self.run.as_ref().is_some_and(|r| r.id == id)
    }
}

/// Result of the model call, before parsing
enum Completion {
    Reply(ChatReply),
    Error(String),
    Cancelled,
}

/// Select / Confirm / Cancel / Draw state machine for one UI session
pub struct LayoutAgent {
    shared: Mutex<Shared>,
    backend: Arc<dyn ChatBackend>,
    observer: Arc<dyn AgentObserver>,
    /// Runtime for spawned runs; the caller's runtime when `None`
    runtime: Option<Handle>,
}

impl LayoutAgent {
    /// Agent spawning runs on the runtime `confirm` is called from
    pub fn new(backend: Arc<dyn ChatBackend>, observer: Arc<dyn AgentObserver>) -> Arc<Self> {
        Self::build(backend, observer, None)
    }

    /// Agent spawning runs on `runtime`, so `confirm` may be called from
    /// threads outside any Tokio runtime (e.g. a host UI thread)
    pub fn with_runtime(
        backend: Arc<dyn ChatBackend>,
        observer: Arc<dyn AgentObserver>,
        runtime: Handle,
    ) -> Arc<Self> {
        Self::build(backend, observer, Some(runtime))
    }

    fn build(
        backend: Arc<dyn ChatBackend>,
        observer: Arc<dyn AgentObserver>,
        runtime: Option<Handle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            shared: Mutex::new(Shared::default()),
            backend,
            observer,
            runtime,
        })
    }

    pub fn state(&self) -> RunState {
        self.shared.lock().state
    }

    pub fn ui_state(&self) -> UiState {
        self.shared.lock().ui_state()
    }

    pub fn pending_query(&self) -> Option<PendingQuery> {
        self.shared.lock().pending.clone()
    }

    pub fn last_result(&self) -> Option<LastResult> {
        self.shared.lock().last_result.clone()
    }

    /// Whether a run handle is currently held
    pub fn has_active_run(&self) -> bool {
        self.shared.lock().run.is_some()
    }

    fn status(&self, text: &str) {
        notify("status", || self.observer.on_status(text));
    }

    fn publish_ui_state(&self) {
        let ui = self.ui_state();
        notify("ui state", || self.observer.on_ui_state(ui));
    }

    /// Stage a query for confirmation.
    ///
    /// Overwrites any previous pending query and clears the last result.
    /// Refused while a run is in flight.
    pub fn select(&self, text: impl Into<String>, layout_z: f64) -> Result<(), ActionError> {
        self.stage(
            PendingQuery::new(text, layout_z),
            "request staged.\nconfirm to call the model (streaming), or cancel to discard.",
        )
    }

    /// Stage the query rendered from a classified selection
    pub fn select_summary(&self, summary: &SelectionSummary) -> Result<(), ActionError> {
        if summary.is_empty() {
            self.status(&ActionError::EmptySelection.to_string());
            return Err(ActionError::EmptySelection);
        }
        let mut summary = summary.clone();
        summary.dedup();
        let status = format!(
            "request staged.\nconfirm to call the model (streaming), or cancel to discard.\n{}",
            summary.counts_label()
        );
        self.stage(PendingQuery::new(summary.to_query(), summary.layout_z), &status)
    }

    fn stage(&self, query: PendingQuery, status: &str) -> Result<(), ActionError> {
        {
            let mut shared = self.shared.lock();
            if shared.state == RunState::Running {
                drop(shared);
                self.status(&ActionError::RunInProgress.to_string());
                return Err(ActionError::RunInProgress);
            }
            debug!("Staging query: {} chars", query.text.chars().count());
            shared.pending = Some(query);
            shared.last_result = None;
            shared.state = RunState::PendingConfirm;
        }

        self.publish_ui_state();
        self.status(status);
        Ok(())
    }

    /// Start the model call for the staged query.
    ///
    /// Moves the pending query out, replaces any stale run handle and enters
    /// `Running` atomically, then spawns the call on the agent's runtime, or
    /// the caller's when none was given. Without either, returns
    /// `NoRuntime` and leaves the staged query in place. The returned handle
    /// resolves when the run has been fully accounted for.
    pub fn confirm(self: &Arc<Self>) -> Result<JoinHandle<RunOutcome>, ActionError> {
        // Checked before any state change
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            warn!("Confirm called outside a Tokio runtime");
            self.status(&ActionError::NoRuntime.to_string());
            return Err(ActionError::NoRuntime);
        };

        let (query, handle) = {
            let mut shared = self.shared.lock();
            let staged = shared.state == RunState::PendingConfirm
                && shared
                    .pending
                    .as_ref()
                    .is_some_and(|p| !p.text.trim().is_empty());
            if !staged {
                drop(shared);
                self.status(&ActionError::NothingPending.to_string());
                return Err(ActionError::NothingPending);
            }

            let Some(query) = shared.pending.take() else {
                return Err(ActionError::NothingPending);
            };
            if let Some(stale) = shared.run.take() {
                warn!("Cancelling stale run {:?} before starting a new one", stale.id);
                stale.token.cancel();
            }

            shared.next_run_id += 1;
            let handle = RunHandle {
                id: RunId(shared.next_run_id),
                token: CancellationToken::new(),
            };
            shared.run = Some(handle.clone());
            shared.state = RunState::Running;
            (query, handle)
        };

        info!("Run {:?} started", handle.id);
        self.publish_ui_state();
        self.status("calling model (streaming)...");

        let agent = Arc::clone(self);
        Ok(runtime.spawn(async move { agent.execute_run(handle, query).await }))
    }

    /// Discard the pending query and cancel any in-flight run
    pub fn cancel(&self) {
        let handle = {
            let mut shared = self.shared.lock();
            shared.pending = None;
            shared.state = RunState::Idle;
            shared.run.take()
        };

        if let Some(handle) = handle {
            info!("Cancelling run {:?}", handle.id);
            handle.token.cancel();
        }
        self.status("canceled.");
        self.publish_ui_state();
    }

    /// Draw the last parsed result without consuming it
    pub fn draw(&self, sink: &dyn DrawSink) -> Result<usize, ActionError> {
        let result = {
            let shared = self.shared.lock();
            if shared.state == RunState::Running {
                Err(ActionError::RunInProgress)
            } else {
                shared
                    .last_result
                    .clone()
                    .filter(|r| !r.segments.is_empty())
                    .ok_or(ActionError::NothingToDraw)
            }
        };
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                self.status(&e.to_string());
                return Err(e);
            }
        };

        let drawn = std::panic::catch_unwind(AssertUnwindSafe(|| {
            sink.draw_segments(&result.segments, result.layout_z)
        }));
        match drawn {
            Ok(Ok(count)) => {
                info!("Drew {} of {} segments", count, result.segments.len());
                self.status(&format!("drew {} lines.", count));
                Ok(count)
            }
            Ok(Err(e)) => {
                let err = ActionError::DrawFailed(e.to_string());
                self.status(&err.to_string());
                Err(err)
            }
            Err(_) => {
                let err = ActionError::DrawFailed("draw sink panicked".to_string());
                self.status(&err.to_string());
                Err(err)
            }
        }
    }

    /// Body of one spawned run; never leaves the state machine in `Running`
    async fn execute_run(self: Arc<Self>, handle: RunHandle, query: PendingQuery) -> RunOutcome {
        let any_delta = AtomicBool::new(false);
        let completion = {
            let observer = &self.observer;
            let any_delta = &any_delta;
            let mut on_delta = move |delta: &str| {
                if delta.is_empty() {
                    return;
                }
                any_delta.store(true, Ordering::Relaxed);
                notify("delta", || observer.on_delta(delta));
            };

            let call = self
                .backend
                .stream_chat(&query.text, &mut on_delta, &handle.token);
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(reply)) => Completion::Reply(reply),
                Ok(Err(ChatError::Cancelled)) => Completion::Cancelled,
                Ok(Err(e)) => Completion::Error(e.to_string()),
                Err(panic) => Completion::Error(format!(
                    "unexpected failure during model call: {}",
                    panic_message(panic.as_ref())
                )),
            }
        };

        let cancelled =
            matches!(completion, Completion::Cancelled) || handle.token.is_cancelled();

        // Nothing was streamed; show the final text once so the operator sees it
        if !cancelled && !any_delta.load(Ordering::Relaxed) {
            let text = match &completion {
                Completion::Reply(reply) => Some(reply.text().to_string()),
                Completion::Error(message) => Some(message.clone()),
                Completion::Cancelled => None,
            };
            if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
                notify("delta", || self.observer.on_delta(&text));
            }
        }

        let (mut outcome, segments) = match completion {
            _ if cancelled => (RunOutcome::Cancelled, None),
            Completion::Cancelled => (RunOutcome::Cancelled, None),
            Completion::Error(message) => (RunOutcome::Failed(message), None),
            Completion::Reply(ChatReply::Empty) => (RunOutcome::NoPayload, None),
            Completion::Reply(ChatReply::Answer(text)) => parse_answer(&text),
        };

        {
            let mut shared = self.shared.lock();
            if shared.is_current(handle.id) {
                shared.run = None;
                shared.state = RunState::Idle;
                if let Some(segments) = segments {
                    shared.last_result = Some(LastResult {
                        segments,
                        layout_z: query.layout_z,
                    });
                }
            } else {
                debug!("Run {:?} was superseded, discarding its result", handle.id);
                outcome = RunOutcome::Cancelled;
            }
        }

        info!("Run {:?} finished: {:?}", handle.id, outcome);
        self.publish_ui_state();
        self.status(&outcome_status(&outcome));
        outcome
    }
}

/// Parse the answer; segments are returned only when drawable
fn parse_answer(text: &str) -> (RunOutcome, Option<Vec<Segment>>) {
    match main_beams_from_answer(text) {
        Ok(MainBeams::Parsed(segments)) => (
            RunOutcome::Parsed {
                segments: segments.len(),
            },
            Some(segments),
        ),
        Ok(MainBeams::NoJson) => (RunOutcome::NoPayload, None),
        Ok(MainBeams::NoBeams) => (RunOutcome::NoMainBeams, None),
        Err(e) => (RunOutcome::InvalidPayload(e.to_string()), None),
    }
}

fn outcome_status(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Parsed { segments } => {
            format!("parsed {} main beams, ready to draw.", segments)
        }
        RunOutcome::NoPayload => "no JSON object found (expected main_beams).".to_string(),
        RunOutcome::NoMainBeams => "finished, but no main_beams were parsed.".to_string(),
        RunOutcome::InvalidPayload(e) => format!("failed to parse main_beams: {}", e),
        RunOutcome::Failed(_) => "model returned an error, see output.".to_string(),
        RunOutcome::Cancelled => "run canceled.".to_string(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
