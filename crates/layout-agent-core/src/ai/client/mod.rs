//! Dify client module
//!
//! One HTTP client per response mode sharing the request and settings model:
//! - streaming: `text/event-stream`, incremental deltas, cancellable
//! - blocking: single JSON response, bounded timeout

pub mod blocking;
pub mod core;
pub mod error;
pub mod request;
pub mod streaming;


// Re-export main types
pub use self::core::{ChatBackend, DifyClient};
pub use error::ChatError;
pub use request::{ChatReply, ChatRequest, ResponseMode};
pub use streaming::consume_stream;
