//! Blocking (single response) API calls
//!
//! Used where streaming is overkill. Failures come back as diagnostic text
//! instead of errors so callers can show them as-is.

use serde::Deserialize;
use tracing::{debug, info};

use super::core::DifyClient;
use super::error::ChatError;
use super::request::{ChatRequest, ResponseMode};
use crate::constants::dify;

#[derive(Debug, Deserialize)]
struct ChatMessagesResponse {
    #[serde(default)]
    answer: Option<String>,
}

impl DifyClient {
    /// Make a single blocking call and return the answer or a diagnostic
    pub async fn call_blocking(&self, query: &str) -> String {
        match self.try_call_blocking(query).await {
            Ok(text) => text,
            Err(e) => e.to_string(),
        }
    }

    /// Blocking call with typed errors.
    ///
    /// A 2xx body without an `answer` field is returned raw, or as the
    /// empty-response sentinel when blank.
    pub async fn try_call_blocking(&self, query: &str) -> Result<String, ChatError> {
        let settings = self.preflight(query)?;

        info!("Dify blocking call: {} chars", query.chars().count());
        let body = ChatRequest::new(query, ResponseMode::Blocking, &settings.user);
        let response = self
            .build_request(self.blocking_http(), &settings)
            .json(&body)
            .send()
            .await?;
        let response = Self::handle_error_response(response).await?;

        let text = response.text().await?;
        let answer = serde_json::from_str::<ChatMessagesResponse>(&text)
            .ok()
            .and_then(|parsed| parsed.answer)
            .filter(|a| !a.trim().is_empty());

        Ok(match answer {
            Some(answer) => answer,
            None if text.trim().is_empty() => dify::EMPTY_RESPONSE.to_string(),
            None => {
                debug!("Blocking response without answer field, returning raw body");
                text
            }
        })
    }
}
