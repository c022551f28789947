//! SSE (Server-Sent Events) stream processing utilities
//!
//! Handles line framing of the `text/event-stream` body and reassembly of
//! the full answer from Dify `message` events.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, info, warn};

/// One decoded `data:` payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamEvent {
    /// Event kind (`message`, `agent_message`, `message_end`, `error`, ...)
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StreamEvent {
    pub fn is_error(&self) -> bool {
        self.event.eq_ignore_ascii_case("error")
    }
}

/// Classification of a single body line
#[derive(Debug)]
pub enum SseLine {
    /// Blank, comment, non-data or undecodable line
    Skip,
    /// `data: [DONE]`
    Done,
    Event(StreamEvent),
}

/// Classify one line of the event stream
pub fn parse_line(line: &str) -> SseLine {
    let line = line.trim();
    if line.is_empty() {
        return SseLine::Skip;
    }

    let Some(prefix) = line.get(..5) else {
        return SseLine::Skip;
    };
    if !prefix.eq_ignore_ascii_case("data:") {
        return SseLine::Skip;
    }

    let data = line[5..].trim();
    if data.is_empty() {
        return SseLine::Skip;
    }
    if data.eq_ignore_ascii_case("[DONE]") {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => SseLine::Event(event),
        Err(e) => {
            warn!("Failed to parse SSE JSON ({}): {}", e, data);
            SseLine::Skip
        }
    }
}

/// Splits raw body bytes into complete lines.
///
/// Bytes are buffered until a newline arrives, so chunk boundaries inside a
/// line or inside a multi-byte UTF-8 sequence are harmless.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    partial: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Take the trailing line that had no terminating newline
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.partial);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

/// Rebuilds the full answer from cumulative or incremental `answer` fields.
///
/// Some deployments resend the whole answer so far on every event, others
/// send only the new fragment, and some mix both. The mode is decided per
/// event: an answer that starts with everything accumulated so far is
/// cumulative and contributes its suffix; anything else is a fragment.
///
/// An incremental fragment that happens to start with the accumulated text
/// is misread as cumulative. This is a known ambiguity of the format and is
/// kept for compatibility.
#[derive(Debug, Default)]
pub struct AnswerAccumulator {
    full: String,
}

impl AnswerAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event's `answer`; returns the delta it contributes, if any
    pub fn accept(&mut self, answer: &str) -> Option<String> {
        let delta = if answer.len() >= self.full.len() && answer.starts_with(self.full.as_str()) {
            &answer[self.full.len()..]
        } else {
            answer
        };

        if delta.is_empty() {
            return None;
        }
        let delta = delta.to_string();
        self.full.push_str(&delta);
        Some(delta)
    }

    pub fn text(&self) -> &str {
        &self.full
    }

    pub fn into_text(self) -> String {
        self.full
    }
}

/// Result of processing one line
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// `[DONE]` sentinel, stop reading
    Done,
    /// `error` event, stop reading and surface the message
    Failed(String),
}

/// Generic fallback when an `error` event carries no message
pub const GENERIC_STREAM_ERROR: &str = "Dify sent an error event.";

/// Stateful processor for one Dify event stream
pub struct DifyStreamProcessor {
    lines: SseLineBuffer,
    answer: AnswerAccumulator,
    /// When the stream started
    stream_start: Instant,
    /// Event counter for logging
    event_count: usize,
    /// Bytes received counter
    bytes_received: usize,
}

impl DifyStreamProcessor {
    pub fn new() -> Self {
        debug!("SSE stream processor created");
        Self {
            lines: SseLineBuffer::new(),
            answer: AnswerAccumulator::new(),
            stream_start: Instant::now(),
            event_count: 0,
            bytes_received: 0,
        }
    }

    /// Buffer a body chunk, returning the complete lines it finished
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        self.bytes_received += bytes.len();
        self.lines.push(bytes)
    }

    /// Trailing unterminated line at end of body
    pub fn take_remainder(&mut self) -> Option<String> {
        self.lines.finish()
    }

    /// Process one line, forwarding any answer delta to `on_delta`
    pub fn process_line(&mut self, line: &str, on_delta: &mut (dyn FnMut(&str) + Send)) -> Step {
        let event = match parse_line(line) {
            SseLine::Skip => return Step::Continue,
            SseLine::Done => {
                info!(
                    "SSE stream [DONE] marker received after {:?}, {} events, {} bytes",
                    self.stream_start.elapsed(),
                    self.event_count,
                    self.bytes_received
                );
                return Step::Done;
            }
            SseLine::Event(event) => event,
        };

        self.event_count += 1;
        debug!("SSE event #{}: event={}", self.event_count, event.event);

        if event.is_error() {
            let message = event
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| GENERIC_STREAM_ERROR.to_string());
            warn!("SSE error event #{}: {}", self.event_count, message);
            return Step::Failed(message);
        }

        let Some(answer) = event.answer.as_deref().filter(|a| !a.is_empty()) else {
            return Step::Continue;
        };

        if let Some(delta) = self.answer.accept(answer) {
            debug!("  -> delta: {} bytes", delta.len());
            if catch_unwind(AssertUnwindSafe(|| on_delta(&delta))).is_err() {
                warn!("Delta callback panicked, continuing stream");
            }
        }

        Step::Continue
    }

    /// Answer reassembled so far
    pub fn answer(&self) -> &str {
        self.answer.text()
    }

    /// Finish processing and hand back the full answer
    pub fn finish(self) -> String {
        info!(
            "SSE stream processor finishing: {:?} elapsed, {} events, {} bytes total",
            self.stream_start.elapsed(),
            self.event_count,
            self.bytes_received
        );
        self.answer.into_text()
    }
}

impl Default for DifyStreamProcessor {
    fn default() -> Self {
        Self::new()
    }
}
