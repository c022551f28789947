//! Streaming API calls
//!
//! Sends `response_mode = "streaming"` and consumes the SSE body line by
//! line, checking for cancellation before every line.

use std::fmt::Display;
use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::core::DifyClient;
use super::error::ChatError;
use super::request::{ChatReply, ChatRequest, ResponseMode};
use crate::ai::sse::{DifyStreamProcessor, Step};

impl DifyClient {
    /// Call the chat endpoint with a streaming response.
    ///
    /// Every accepted delta is forwarded to `on_delta` synchronously; a
    /// panicking callback is logged and ignored. Non-2xx responses, transport
    /// failures and `error` events come back as `ChatError`, cancellation as
    /// `ChatError::Cancelled`.
    pub async fn call_streaming(
        &self,
        query: &str,
        on_delta: &mut (dyn FnMut(&str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ChatReply, ChatError> {
        let settings = self.preflight(query)?;

        let call_start = Instant::now();
        info!("=== DIFY STREAMING CALL START ===");
        info!("Query: {} chars, user: {}", query.chars().count(), settings.user);

        let body = ChatRequest::new(query, ResponseMode::Streaming, &settings.user);
        let request = self
            .build_request(self.streaming_http(), &settings)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Streaming call cancelled before response");
                return Err(ChatError::Cancelled);
            }
            response = request.send() => response?,
        };
        info!("Dify response: {} in {:?}", response.status(), call_start.elapsed());

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Streaming call cancelled while reading the response");
                return Err(ChatError::Cancelled);
            }
            response = Self::handle_error_response(response) => response?,
        };
        let text = consume_stream(response.bytes_stream(), on_delta, cancel).await?;

        info!(
            "=== DIFY STREAMING CALL END === {} chars in {:?}",
            text.chars().count(),
            call_start.elapsed()
        );
        Ok(ChatReply::from_text(text))
    }
}

/// Drive a Dify event stream to completion.
///
/// Returns the reassembled answer (possibly empty) when the body ends or a
/// `[DONE]` line arrives. Dropping `stream` on cancellation aborts the
/// underlying HTTP transfer.
pub async fn consume_stream<S, E>(
    stream: S,
    on_delta: &mut (dyn FnMut(&str) + Send),
    cancel: &CancellationToken,
) -> Result<String, ChatError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut processor = DifyStreamProcessor::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Stream cancelled with {} bytes of partial answer", processor.answer().len());
                return Err(ChatError::Cancelled);
            }
            chunk = stream.next() => chunk,
        };

        let lines = match chunk {
            Some(Ok(bytes)) => {
                debug!("SSE chunk received: {} bytes", bytes.len());
                processor.push_bytes(&bytes)
            }
            Some(Err(e)) => {
                warn!("Stream read failed: {}", e);
                return Err(ChatError::Transport(e.to_string()));
            }
            None => {
                // Body ended; a final line may lack its newline
                let rest: Vec<String> = processor.take_remainder().into_iter().collect();
                process_lines(&mut processor, &rest, on_delta, cancel)?;
                debug!("Stream ended");
                return Ok(processor.finish());
            }
        };

        if process_lines(&mut processor, &lines, on_delta, cancel)? == Step::Done {
            return Ok(processor.finish());
        }
    }
}

/// Feed lines to the processor until one ends the stream.
///
/// Returns `Step::Done` on `[DONE]`, `Step::Continue` when every line was
/// consumed; cancellation and `error` events are returned as errors.
fn process_lines(
    processor: &mut DifyStreamProcessor,
    lines: &[String],
    on_delta: &mut (dyn FnMut(&str) + Send),
    cancel: &CancellationToken,
) -> Result<Step, ChatError> {
    for line in lines {
        if cancel.is_cancelled() {
            info!("Stream cancelled between lines");
            return Err(ChatError::Cancelled);
        }
        match processor.process_line(line, on_delta) {
            Step::Continue => {}
            Step::Done => return Ok(Step::Done),
            Step::Failed(message) => return Err(ChatError::Protocol(message)),
        }
    }
    Ok(Step::Continue)
}
