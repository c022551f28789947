//! Dify connection settings
//!
//! Resolved on every call so that editing the environment or the settings
//! file takes effect without restarting the host. Environment variables
//! always win over the file; the file only fills fields still missing.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::constants::dify;
use crate::paths;

/// Resolved endpoint, credentials and end-user id
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    /// Base URL without trailing slash, e.g. `http://host/v1`
    pub api_url: String,
    /// Bearer token; empty means "not configured"
    pub api_key: String,
    /// End-user id reported to Dify
    pub user: String,
}

/// On-disk shape of `dify.settings.json`
#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

impl SettingsFile {
    /// Read the file if it exists
    fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Resolve settings from an environment lookup and an optional file.
    ///
    /// Never fails: an unreadable or malformed file is logged and ignored,
    /// missing values fall back to defaults. The API key is never defaulted.
    pub fn resolve<F>(env: F, file: Option<&Path>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut api_url = non_blank(env(dify::ENV_API_URL));
        let mut api_key = non_blank(env(dify::ENV_API_KEY));
        let mut user = non_blank(env(dify::ENV_USER));

        if api_url.is_none() || api_key.is_none() {
            if let Some(path) = file {
                match SettingsFile::load(path) {
                    Ok(Some(from_file)) => {
                        debug!("Filling missing settings from {:?}", path);
                        api_url = api_url.or_else(|| non_blank(from_file.api_url));
                        api_key = api_key.or_else(|| non_blank(from_file.api_key));
                        user = user.or_else(|| non_blank(from_file.user));
                    }
                    Ok(None) => debug!("No settings file at {:?}", path),
                    Err(e) => warn!("Ignoring unreadable settings file {:?}: {}", path, e),
                }
            }
        }

        Self::normalize(api_url, api_key, user)
    }

    fn normalize(api_url: Option<String>, api_key: Option<String>, user: Option<String>) -> Self {
        let api_url = api_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| dify::DEFAULT_API_URL.to_string());

        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.unwrap_or_default().trim().to_string(),
            user: user
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| dify::DEFAULT_USER.to_string()),
        }
    }

    /// Whether a usable API key is present
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Full URL of the chat-messages endpoint
    pub fn chat_messages_url(&self) -> String {
        format!("{}{}", self.api_url, dify::CHAT_MESSAGES_PATH)
    }

    /// API key with everything but the last four characters hidden
    pub fn masked_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(chars.len() - 4), tail)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_url", &self.api_url)
            .field("api_key", &self.masked_key())
            .field("user", &self.user)
            .finish()
    }
}

/// Source of settings, consulted once per client call
pub trait SettingsProvider: Send + Sync {
    fn load(&self) -> Settings;
}

/// Process environment plus the fallback settings file
#[derive(Debug, Clone)]
pub struct EnvSettings {
    file: PathBuf,
}

impl EnvSettings {
    /// Use the default per-user settings file
    pub fn new() -> Self {
        Self {
            file: paths::settings_file(),
        }
    }

    /// Use a specific settings file instead of the per-user one
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self { file: path.into() }
    }

    /// Path of the fallback settings file
    pub fn file(&self) -> &Path {
        &self.file
    }
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsProvider for EnvSettings {
    fn load(&self) -> Settings {
        Settings::resolve(|key| std::env::var(key).ok(), Some(&self.file))
    }
}

/// Fixed settings, for embedding and tests
#[derive(Debug, Clone)]
pub struct StaticSettings(pub Settings);

impl SettingsProvider for StaticSettings {
    fn load(&self) -> Settings {
        self.0.clone()
    }
}
