//! Application constants and configuration defaults
//!
//! Centralized location for magic numbers and default values

use std::time::Duration;

/// HTTP client configuration
pub mod http {
    use super::*;

    /// Connection timeout for HTTP requests
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Streaming timeout - model generation for a full floor plan is slow,
    /// SSE streams can run several minutes
    pub const STREAM_TIMEOUT: Duration = Duration::from_secs(300);

    /// Timeout for single-shot blocking calls
    pub const BLOCKING_TIMEOUT: Duration = Duration::from_secs(90);

    /// User agent sent with every request
    pub const USER_AGENT: &str = concat!("layout-agent/", env!("CARGO_PKG_VERSION"));
}

/// Dify service configuration
pub mod dify {
    /// Environment variable holding the API base URL
    pub const ENV_API_URL: &str = "DIFY_API_URL";

    /// Environment variable holding the app API key
    pub const ENV_API_KEY: &str = "DIFY_API_KEY";

    /// Environment variable holding the end-user id
    pub const ENV_USER: &str = "DIFY_USER";

    /// Base URL used when neither environment nor config file provide one
    pub const DEFAULT_API_URL: &str = "http://127.0.0.1/v1";

    /// End-user id used when none is configured
    pub const DEFAULT_USER: &str = "layout-agent-user";

    /// Chat endpoint path, appended to the base URL
    pub const CHAT_MESSAGES_PATH: &str = "/chat-messages";

    /// Returned in place of an answer when the stream carried no text
    pub const EMPTY_RESPONSE: &str = "Dify returned an empty response.";
}

/// Filesystem layout
pub mod fs {
    /// Per-user directory name under the home directory
    pub const APP_DIR_NAME: &str = ".layout-agent";

    /// Settings file name inside the config directory
    pub const SETTINGS_FILE_NAME: &str = "dify.settings.json";
}

/// Units used at the drawing boundary
pub mod units {
    /// Millimetres per international foot
    pub const MM_PER_FOOT: f64 = 304.8;
}
