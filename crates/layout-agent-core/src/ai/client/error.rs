//! Client error types
//!
//! Display strings are shown to the operator verbatim.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// No API key in environment or settings file; no request is made
    #[error(
        "Dify API key is not configured.\nSet DIFY_API_KEY (optionally DIFY_API_URL), or add \"api_key\" to dify.settings.json."
    )]
    MissingApiKey,

    /// Blank query; no request is made
    #[error("query is empty, request skipped.")]
    EmptyQuery,

    /// Non-2xx response
    #[error("Dify request failed: HTTP {status} {reason}\n{body}")]
    Http {
        status: u16,
        reason: String,
        body: String,
    },

    /// Connection, timeout or body read failure
    #[error("Dify request failed: {0}")]
    Transport(String),

    /// `error` event inside the stream
    #[error("Dify stream returned an error: {0}")]
    Protocol(String),

    /// Run cancelled by the caller
    #[error("request canceled")]
    Cancelled,
}

impl ChatError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChatError::Cancelled)
    }

    /// Configuration problems are terminal until the operator fixes settings
    pub fn is_configuration(&self) -> bool {
        matches!(self, ChatError::MissingApiKey)
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}
