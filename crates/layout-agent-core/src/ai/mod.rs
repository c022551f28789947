//! Dify chat layer
//!
//! Talks to a Dify app's `/chat-messages` endpoint, either streaming
//! (server-sent events) or blocking.

pub mod client;
pub mod sse;
