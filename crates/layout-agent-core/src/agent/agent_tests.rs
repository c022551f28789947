//! Tests for the run state machine, driven by a scripted backend

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Barrier, Notify};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::ai::client::{ChatBackend, ChatError, ChatReply};
use crate::payload::{Point2D, Segment};
use crate::selection::{ColumnInfo, SelectionSummary};

const TWO_BEAMS: &str = r#"Layout done.
{"main_beams": [
  {"start": {"x": 0, "y": 0}, "end": {"x": 6000, "y": 0}},
  {"start": {"x": 0, "y": 0}, "end": {"x": 0, "y": 8000}}
]}"#;

enum Script {
    /// Stream the deltas, then return their concatenation
    Reply(Vec<&'static str>),
    /// Return the text without streaming anything
    Silent(&'static str),
    Fail(ChatError),
    /// Wait for cancellation, or for `release` and then answer
    Hang(&'static str),
    /// Wait for the gate and answer, ignoring cancellation
    Gate(Arc<Notify>, &'static str),
    Panic,
}

#[derive(Default)]
struct FakeBackend {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
    release: Notify,
}

impl FakeBackend {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Yield until the spawned runs have reached the backend
    async fn wait_for_calls(&self, n: usize) {
        while self.calls() < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn stream_chat(
        &self,
        _query: &str,
        on_delta: &mut (dyn for<'s> FnMut(&'s str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ChatReply, ChatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().pop_front().expect("unscripted call");
        match script {
            Script::Reply(deltas) => {
                for delta in &deltas {
                    on_delta(delta);
                }
                Ok(ChatReply::from_text(deltas.concat()))
            }
            Script::Silent(text) => Ok(ChatReply::from_text(text.to_string())),
            Script::Fail(err) => Err(err),
            Script::Hang(text) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ChatError::Cancelled),
                    _ = self.release.notified() => Ok(ChatReply::from_text(text.to_string())),
                }
            }
            Script::Gate(gate, text) => {
                gate.notified().await;
                Ok(ChatReply::from_text(text.to_string()))
            }
            Script::Panic => panic!("backend blew up"),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    drawn: Mutex<Vec<(Vec<Segment>, f64)>>,
}

impl DrawSink for RecordingSink {
    fn draw_segments(&self, segments: &[Segment], layout_z: f64) -> anyhow::Result<usize> {
        self.drawn.lock().push((segments.to_vec(), layout_z));
        Ok(segments.len())
    }
}

struct FailingSink;

impl DrawSink for FailingSink {
    fn draw_segments(&self, _segments: &[Segment], _layout_z: f64) -> anyhow::Result<usize> {
        anyhow::bail!("no active document")
    }
}

struct PanickyObserver;

impl AgentObserver for PanickyObserver {
    fn on_status(&self, _text: &str) {
        panic!("status handler bug");
    }

    fn on_delta(&self, _delta: &str) {
        panic!("delta handler bug");
    }
}

fn agent_with(
    backend: Arc<FakeBackend>,
) -> (Arc<LayoutAgent>, mpsc::UnboundedReceiver<AgentEvent>) {
    let (observer, rx) = ChannelObserver::new();
    (LayoutAgent::new(backend, Arc::new(observer)), rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn deltas(events: &[AgentEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Delta(d) => Some(d.clone()),
            _ => None,
        })
        .collect()
}

fn statuses(events: &[AgentEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Status(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_confirm_from_idle_is_rejected() {
    let backend = FakeBackend::new(vec![]);
    let (agent, mut rx) = agent_with(backend.clone());

    assert_eq!(agent.confirm().err(), Some(ActionError::NothingPending));
    assert_eq!(agent.state(), RunState::Idle);
    assert_eq!(backend.calls(), 0);
    assert_eq!(
        statuses(&drain(&mut rx)),
        vec![ActionError::NothingPending.to_string()]
    );
}

#[tokio::test]
async fn test_select_stages_query() {
    let (agent, mut rx) = agent_with(FakeBackend::new(vec![]));

    agent.select("lay out beams", 19.685).unwrap();

    assert_eq!(agent.state(), RunState::PendingConfirm);
    assert_eq!(
        agent.pending_query(),
        Some(PendingQuery::new("lay out beams", 19.685))
    );
    let ui = agent.ui_state();
    assert!(ui.can_confirm && ui.can_cancel && ui.can_select && !ui.can_draw);

    let events = drain(&mut rx);
    assert!(events.contains(&AgentEvent::UiState(ui)));
    assert!(statuses(&events)[0].starts_with("request staged."));
}

#[tokio::test]
async fn test_blank_query_cannot_be_confirmed() {
    let backend = FakeBackend::new(vec![]);
    let (agent, _rx) = agent_with(backend.clone());

    agent.select("   \n", 0.0).unwrap();
    assert_eq!(agent.confirm().err(), Some(ActionError::NothingPending));
    assert_eq!(agent.state(), RunState::PendingConfirm);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_run_parses_and_draw_is_repeatable() {
    let (head, tail) = TWO_BEAMS.split_at(20);
    let backend = FakeBackend::new(vec![Script::Reply(vec![head, tail])]);
    let (agent, mut rx) = agent_with(backend.clone());

    agent.select("query", 12.5).unwrap();
    let run = agent.confirm().unwrap();
    let outcome = run.await.unwrap();

    assert_eq!(outcome, RunOutcome::Parsed { segments: 2 });
    assert_eq!(agent.state(), RunState::Idle);
    assert!(!agent.has_active_run());
    assert!(agent.pending_query().is_none());
    assert!(agent.ui_state().can_draw);

    let events = drain(&mut rx);
    assert_eq!(deltas(&events), vec![head.to_string(), tail.to_string()]);
    let statuses = statuses(&events);
    assert!(statuses.contains(&"calling model (streaming)...".to_string()));
    assert_eq!(
        statuses.last().map(String::as_str),
        Some("parsed 2 main beams, ready to draw.")
    );

    let sink = RecordingSink::default();
    assert_eq!(agent.draw(&sink), Ok(2));
    assert_eq!(agent.draw(&sink), Ok(2));

    let drawn = sink.drawn.lock();
    assert_eq!(drawn.len(), 2);
    assert_eq!(drawn[0].1, 12.5);
    assert_eq!(
        drawn[0].0[0],
        Segment::new(Point2D::new(0.0, 0.0), Point2D::new(6000.0, 0.0))
    );
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_silent_answer_is_forwarded_once() {
    let backend = FakeBackend::new(vec![Script::Silent(TWO_BEAMS)]);
    let (agent, mut rx) = agent_with(backend);

    agent.select("query", 0.0).unwrap();
    let outcome = agent.confirm().unwrap().await.unwrap();

    assert_eq!(outcome, RunOutcome::Parsed { segments: 2 });
    assert_eq!(deltas(&drain(&mut rx)), vec![TWO_BEAMS.to_string()]);
}

#[tokio::test]
async fn test_error_is_shown_as_output() {
    let backend = FakeBackend::new(vec![Script::Fail(ChatError::Http {
        status: 401,
        reason: "Unauthorized".to_string(),
        body: "bad key".to_string(),
    })]);
    let (agent, mut rx) = agent_with(backend);

    agent.select("query", 0.0).unwrap();
    let outcome = agent.confirm().unwrap().await.unwrap();

    let RunOutcome::Failed(message) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(message.contains("HTTP 401"));
    assert_eq!(agent.state(), RunState::Idle);
    assert!(agent.last_result().is_none());

    let events = drain(&mut rx);
    assert_eq!(deltas(&events), vec![message]);
    assert_eq!(
        statuses(&events).last().map(String::as_str),
        Some("model returned an error, see output.")
    );
}

#[tokio::test]
async fn test_answer_without_json() {
    let backend = FakeBackend::new(vec![
        Script::Reply(vec!["I cannot help with that."]),
        Script::Reply(vec![r#"{"main_beams": []}"#]),
        Script::Reply(vec![r#"{"main_beams": 5}"#]),
    ]);
    let (agent, _rx) = agent_with(backend);

    agent.select("query", 0.0).unwrap();
    assert_eq!(
        agent.confirm().unwrap().await.unwrap(),
        RunOutcome::NoPayload
    );

    agent.select("query", 0.0).unwrap();
    assert_eq!(
        agent.confirm().unwrap().await.unwrap(),
        RunOutcome::NoMainBeams
    );

    agent.select("query", 0.0).unwrap();
    assert!(matches!(
        agent.confirm().unwrap().await.unwrap(),
        RunOutcome::InvalidPayload(_)
    ));

    assert!(agent.last_result().is_none());
    assert!(!agent.ui_state().can_draw);
}

#[tokio::test]
async fn test_cancel_pending_discards_query() {
    let (agent, mut rx) = agent_with(FakeBackend::new(vec![]));

    agent.select("query", 0.0).unwrap();
    agent.cancel();

    assert_eq!(agent.state(), RunState::Idle);
    assert!(agent.pending_query().is_none());
    assert!(statuses(&drain(&mut rx)).contains(&"canceled.".to_string()));
    assert_eq!(agent.confirm().err(), Some(ActionError::NothingPending));
}

#[tokio::test]
async fn test_cancel_from_idle_is_noop() {
    let (agent, _rx) = agent_with(FakeBackend::new(vec![]));

    agent.cancel();
    assert_eq!(agent.state(), RunState::Idle);
    assert!(!agent.has_active_run());
}

#[tokio::test]
async fn test_cancel_running() {
    let backend = FakeBackend::new(vec![Script::Hang(TWO_BEAMS)]);
    let (agent, mut rx) = agent_with(backend);

    agent.select("query", 0.0).unwrap();
    let run = agent.confirm().unwrap();
    assert_eq!(agent.state(), RunState::Running);
    assert!(agent.has_active_run());

    agent.cancel();
    assert_eq!(agent.state(), RunState::Idle);
    assert!(!agent.has_active_run());

    assert_eq!(run.await.unwrap(), RunOutcome::Cancelled);
    assert_eq!(agent.state(), RunState::Idle);
    assert!(agent.last_result().is_none());

    let events = drain(&mut rx);
    assert!(deltas(&events).is_empty());
    assert_eq!(
        statuses(&events).last().map(String::as_str),
        Some("run canceled.")
    );
}

#[tokio::test]
async fn test_actions_refused_while_running() {
    let backend = FakeBackend::new(vec![Script::Hang(TWO_BEAMS)]);
    let (agent, _rx) = agent_with(backend.clone());

    agent.select("query", 0.0).unwrap();
    let run = agent.confirm().unwrap();

    assert_eq!(agent.select("other", 0.0), Err(ActionError::RunInProgress));
    assert_eq!(agent.confirm().err(), Some(ActionError::NothingPending));
    assert_eq!(
        agent.draw(&RecordingSink::default()),
        Err(ActionError::RunInProgress)
    );
    let ui = agent.ui_state();
    assert!(!ui.can_select && !ui.can_confirm && ui.can_cancel && !ui.can_draw);

    backend.release.notify_one();
    assert_eq!(run.await.unwrap(), RunOutcome::Parsed { segments: 2 });
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_confirms_start_one_run() {
    const TASKS: usize = 16;

    let backend = FakeBackend::new(vec![Script::Hang(TWO_BEAMS)]);
    let (agent, _rx) = agent_with(backend.clone());
    agent.select("query", 0.0).unwrap();

    let barrier = Arc::new(Barrier::new(TASKS));
    let attempts: Vec<_> = (0..TASKS)
        .map(|_| {
            let agent = Arc::clone(&agent);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                agent.confirm()
            })
        })
        .collect();

    let mut runs = Vec::new();
    let mut refused = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(run) => runs.push(run),
            Err(e) => {
                assert_eq!(e, ActionError::NothingPending);
                refused += 1;
            }
        }
    }

    assert_eq!(runs.len(), 1);
    assert_eq!(refused, TASKS - 1);
    assert_eq!(agent.state(), RunState::Running);
    assert!(agent.has_active_run());

    backend.release.notify_one();
    for run in runs {
        assert_eq!(run.await.unwrap(), RunOutcome::Parsed { segments: 2 });
    }
    assert!(!agent.has_active_run());
    assert_eq!(backend.calls(), 1);
}

#[test]
fn test_confirm_outside_runtime_is_refused() {
    let backend = FakeBackend::new(vec![]);
    let (agent, mut rx) = agent_with(backend.clone());
    agent.select("query", 3.0).unwrap();

    assert_eq!(agent.confirm().err(), Some(ActionError::NoRuntime));
    assert_eq!(agent.state(), RunState::PendingConfirm);
    assert!(!agent.has_active_run());
    assert_eq!(agent.pending_query(), Some(PendingQuery::new("query", 3.0)));
    assert_eq!(backend.calls(), 0);
    assert_eq!(
        statuses(&drain(&mut rx)).last(),
        Some(&ActionError::NoRuntime.to_string())
    );

    // Still usable afterwards
    agent.cancel();
    agent.select("again", 0.0).unwrap();
    assert_eq!(agent.state(), RunState::PendingConfirm);
}

#[test]
fn test_confirm_from_plain_thread_with_runtime_handle() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let backend = FakeBackend::new(vec![Script::Reply(vec![TWO_BEAMS])]);
    let (observer, _rx) = ChannelObserver::new();
    let agent = LayoutAgent::with_runtime(
        backend.clone(),
        Arc::new(observer),
        runtime.handle().clone(),
    );

    agent.select("query", 0.0).unwrap();
    let run = agent.confirm().unwrap();
    let outcome = runtime.block_on(run).unwrap();

    assert_eq!(outcome, RunOutcome::Parsed { segments: 2 });
    assert_eq!(agent.state(), RunState::Idle);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_backend_panic_returns_to_idle() {
    let backend = FakeBackend::new(vec![Script::Panic, Script::Reply(vec![TWO_BEAMS])]);
    let (agent, mut rx) = agent_with(backend);

    agent.select("query", 0.0).unwrap();
    let outcome = agent.confirm().unwrap().await.unwrap();

    let RunOutcome::Failed(message) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(message.contains("backend blew up"));
    assert_eq!(agent.state(), RunState::Idle);
    assert!(!agent.has_active_run());
    assert_eq!(deltas(&drain(&mut rx)), vec![message]);

    agent.select("query", 0.0).unwrap();
    assert_eq!(
        agent.confirm().unwrap().await.unwrap(),
        RunOutcome::Parsed { segments: 2 }
    );
}

#[tokio::test]
async fn test_observer_panics_are_swallowed() {
    let backend = FakeBackend::new(vec![Script::Reply(vec![
        r#"{"main_beams": ["#,
        r#"{"start": {"x": 1, "y": 2}, "end": {"x": 3, "y": 4}}]}"#,
    ])]);
    let agent = LayoutAgent::new(backend, Arc::new(PanickyObserver));

    agent.select("query", 0.0).unwrap();
    let outcome = agent.confirm().unwrap().await.unwrap();

    assert_eq!(outcome, RunOutcome::Parsed { segments: 1 });
    assert_eq!(agent.state(), RunState::Idle);
    assert_eq!(agent.draw(&RecordingSink::default()), Ok(1));
}

#[tokio::test]
async fn test_superseded_run_leaves_newer_run_alone() {
    let gate = Arc::new(Notify::new());
    let backend = FakeBackend::new(vec![
        Script::Gate(Arc::clone(&gate), TWO_BEAMS),
        Script::Hang(TWO_BEAMS),
    ]);
    let (agent, _rx) = agent_with(backend.clone());

    agent.select("first", 1.0).unwrap();
    let first = agent.confirm().unwrap();
    backend.wait_for_calls(1).await;
    agent.cancel();

    agent.select("second", 2.0).unwrap();
    let second = agent.confirm().unwrap();
    backend.wait_for_calls(2).await;

    // First run ignores its token and completes late
    gate.notify_one();
    assert_eq!(first.await.unwrap(), RunOutcome::Cancelled);
    assert_eq!(agent.state(), RunState::Running);
    assert!(agent.has_active_run());
    assert!(agent.last_result().is_none());

    backend.release.notify_one();
    assert_eq!(second.await.unwrap(), RunOutcome::Parsed { segments: 2 });
    assert_eq!(agent.last_result().map(|r| r.layout_z), Some(2.0));
}

#[tokio::test]
async fn test_reselect_clears_last_result() {
    let backend = FakeBackend::new(vec![Script::Reply(vec![TWO_BEAMS])]);
    let (agent, _rx) = agent_with(backend);

    agent.select("query", 0.0).unwrap();
    agent.confirm().unwrap().await.unwrap();
    assert!(agent.last_result().is_some());

    agent.select("again", 0.0).unwrap();
    assert!(agent.last_result().is_none());
    assert_eq!(
        agent.draw(&RecordingSink::default()),
        Err(ActionError::NothingToDraw)
    );
}

#[tokio::test]
async fn test_draw_errors() {
    let backend = FakeBackend::new(vec![Script::Reply(vec![TWO_BEAMS])]);
    let (agent, mut rx) = agent_with(backend);

    assert_eq!(
        agent.draw(&RecordingSink::default()),
        Err(ActionError::NothingToDraw)
    );

    agent.select("query", 0.0).unwrap();
    agent.confirm().unwrap().await.unwrap();
    drain(&mut rx);

    assert_eq!(
        agent.draw(&FailingSink),
        Err(ActionError::DrawFailed("no active document".to_string()))
    );
    assert_eq!(
        statuses(&drain(&mut rx)),
        vec!["drawing failed: no active document".to_string()]
    );
    // Result survives a failed draw
    assert!(agent.ui_state().can_draw);
}

#[tokio::test]
async fn test_select_summary() {
    let (agent, _rx) = agent_with(FakeBackend::new(vec![]));

    assert_eq!(
        agent.select_summary(&SelectionSummary::default()),
        Err(ActionError::EmptySelection)
    );
    assert_eq!(agent.state(), RunState::Idle);

    let mut summary = SelectionSummary::for_view("6.000 structural plan").unwrap();
    summary.columns.push(ColumnInfo {
        id: 7,
        family_type: "C1".to_string(),
        position_mm: None,
        size_mm: None,
    });
    agent.select_summary(&summary).unwrap();

    let pending = agent.pending_query().unwrap();
    assert_eq!(pending.text, summary.to_query());
    assert_eq!(pending.layout_z, summary.layout_z);
    assert_eq!(agent.state(), RunState::PendingConfirm);
}

#[tokio::test]
async fn test_select_summary_reports_distinct_counts() {
    let (agent, mut rx) = agent_with(FakeBackend::new(vec![]));

    let mut summary = SelectionSummary::for_view("6.000 structural plan").unwrap();
    for _ in 0..3 {
        summary.columns.push(ColumnInfo {
            id: 7,
            family_type: "C1".to_string(),
            position_mm: None,
            size_mm: None,
        });
    }
    summary.load_lines = vec![40, 41, 40];
    agent.select_summary(&summary).unwrap();

    let counts = "columns: 1; floors: 0; opening lines: 0; load lines: 2";
    let statuses = statuses(&drain(&mut rx));
    assert!(
        statuses.last().is_some_and(|s| s.ends_with(counts)),
        "unexpected status: {:?}",
        statuses
    );
    assert!(agent.pending_query().unwrap().text.contains(counts));
}
