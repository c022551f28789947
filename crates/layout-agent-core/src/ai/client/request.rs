//! Request and reply model shared by both response modes

use serde::Serialize;

use crate::constants::dify;

/// Dify `response_mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Streaming,
    Blocking,
}

/// Body of `POST /chat-messages`.
///
/// `conversation_id` is always empty: every call starts a fresh conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub inputs: serde_json::Map<String, serde_json::Value>,
    pub query: String,
    pub response_mode: ResponseMode,
    pub conversation_id: String,
    pub user: String,
}

impl ChatRequest {
    pub fn new(query: &str, response_mode: ResponseMode, user: &str) -> Self {
        Self {
            inputs: serde_json::Map::new(),
            query: query.to_string(),
            response_mode,
            conversation_id: String::new(),
            user: user.to_string(),
        }
    }
}

/// Successful end of a streaming call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatReply {
    /// Non-empty reassembled answer
    Answer(String),
    /// Stream finished without any answer text
    Empty,
}

impl ChatReply {
    pub fn from_text(text: String) -> Self {
        if text.is_empty() {
            ChatReply::Empty
        } else {
            ChatReply::Answer(text)
        }
    }

    /// Answer text, or the empty-response sentinel
    pub fn text(&self) -> &str {
        match self {
            ChatReply::Answer(text) => text,
            ChatReply::Empty => dify::EMPTY_RESPONSE,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ChatReply::Empty)
    }
}
