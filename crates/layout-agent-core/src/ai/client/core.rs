//! Core Dify client
//!
//! The DifyClient struct owns the HTTP clients and resolves settings on
//! every call, so credentials can change while the host is running.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::error::ChatError;
use super::request::ChatReply;
use crate::constants;
use crate::settings::{Settings, SettingsProvider};

/// Streaming chat seam used by the run state machine
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stream one answer, forwarding each delta as it arrives.
    ///
    /// Returns `Err(ChatError::Cancelled)` once `cancel` fires.
    async fn stream_chat(
        &self,
        query: &str,
        on_delta: &mut (dyn for<'s> FnMut(&'s str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ChatReply, ChatError>;
}

/// Dify chat-messages client
pub struct DifyClient {
    streaming_http: Client,
    blocking_http: Client,
    settings: Arc<dyn SettingsProvider>,
}

impl DifyClient {
    /// Create an HTTP client with the given overall timeout
    fn create_http_client(timeout: Duration) -> Client {
        Client::builder()
            .user_agent(constants::http::USER_AGENT)
            .connect_timeout(constants::http::CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build HTTP client: {}. Using default client.", e);
                Client::new()
            })
    }

    /// Create a client reading settings from `provider` on every call
    pub fn new(provider: Arc<dyn SettingsProvider>) -> Self {
        Self {
            // Long timeout for streaming - generating a full layout can take minutes
            streaming_http: Self::create_http_client(constants::http::STREAM_TIMEOUT),
            blocking_http: Self::create_http_client(constants::http::BLOCKING_TIMEOUT),
            settings: provider,
        }
    }

    /// Resolve the current settings
    pub fn settings(&self) -> Settings {
        self.settings.load()
    }

    pub(crate) fn streaming_http(&self) -> &Client {
        &self.streaming_http
    }

    pub(crate) fn blocking_http(&self) -> &Client {
        &self.blocking_http
    }

    /// Resolve settings and validate the call before any network I/O
    pub(crate) fn preflight(&self, query: &str) -> Result<Settings, ChatError> {
        let settings = self.settings();
        if !settings.has_api_key() {
            return Err(ChatError::MissingApiKey);
        }
        if query.trim().is_empty() {
            return Err(ChatError::EmptyQuery);
        }
        Ok(settings)
    }

    /// Build a POST to the chat endpoint with bearer authentication
    pub(crate) fn build_request(&self, http: &Client, settings: &Settings) -> reqwest::RequestBuilder {
        let url = settings.chat_messages_url();
        debug!("POST {} as user {}", url, settings.user);
        http.post(url)
            .bearer_auth(&settings.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
    }

    /// Turn a non-success response into `ChatError::Http`
    pub(crate) async fn handle_error_response(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ChatError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let reason = status.canonical_reason().unwrap_or_default().to_string();
        let body = response.text().await.unwrap_or_default();
        error!("Dify error response: {} - {}", status, body);
        Err(ChatError::Http {
            status: status.as_u16(),
            reason,
            body,
        })
    }
}

#[async_trait]
impl ChatBackend for DifyClient {
    async fn stream_chat(
        &self,
        query: &str,
        on_delta: &mut (dyn for<'s> FnMut(&'s str) + Send),
        cancel: &CancellationToken,
    ) -> Result<ChatReply, ChatError> {
        self.call_streaming(query, on_delta, cancel).await
    }
}
