//! Session configuration.
//!
//! `AuthConfig` holds the backend location, the endpoint prefix and the
//! storage key under which the refresh token is persisted. It is loaded
//! from `~/.config/authsession/config.json` when present, with environment
//! variables taking precedence.
//!
//! `SessionOptions` pairs a config with the optional session-abort callback
//! and is what [`SessionStore::configure`](crate::SessionStore::configure)
//! accepts.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "authsession";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_URI_PREFIX: &str = "/auth";
const DEFAULT_REFRESH_TOKEN_KEY: &str = "refresh_token";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// The logoff notification is best-effort, so it gets a much shorter leash.
const DEFAULT_LOGOFF_TIMEOUT_SECS: u64 = 5;

const ENV_BASE_URL: &str = "AUTHSESSION_BASE_URL";
const ENV_URI_PREFIX: &str = "AUTHSESSION_URI_PREFIX";
const ENV_REFRESH_TOKEN_KEY: &str = "AUTHSESSION_REFRESH_TOKEN_KEY";

/// Backend endpoints owned by the session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Login,
    Refresh,
    Logoff,
}

impl Endpoint {
    fn path(self) -> &'static str {
        match self {
            Endpoint::Login => "login",
            Endpoint::Refresh => "refresh",
            Endpoint::Logoff => "logoff",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub base_url: String,
    pub uri_prefix: String,
    pub refresh_token_key: String,
    pub request_timeout_secs: u64,
    pub logoff_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            uri_prefix: DEFAULT_URI_PREFIX.to_string(),
            refresh_token_key: DEFAULT_REFRESH_TOKEN_KEY.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            logoff_timeout_secs: DEFAULT_LOGOFF_TIMEOUT_SECS,
        }
    }
}

impl AuthConfig {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AuthConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config.normalized())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply the `AUTHSESSION_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(base_url) = std::env::var(ENV_BASE_URL) {
            self.base_url = base_url;
        }
        if let Ok(prefix) = std::env::var(ENV_URI_PREFIX) {
            self.uri_prefix = prefix;
        }
        if let Ok(key) = std::env::var(ENV_REFRESH_TOKEN_KEY) {
            self.refresh_token_key = key;
        }
        self.normalized()
    }

    /// Canonical form: no trailing slash on the base URL, prefix either
    /// empty or `/segment` without a trailing slash.
    pub fn normalized(mut self) -> Self {
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        let prefix = self.uri_prefix.trim_matches('/');
        self.uri_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("/{}", prefix)
        };
        self
    }

    /// Absolute URL of one of the session endpoints.
    pub fn endpoint_url(&self, endpoint: Endpoint) -> String {
        format!("{}{}/{}", self.base_url, self.uri_prefix, endpoint.path())
    }

    /// Resolve a request target against the base URL. Absolute URLs pass
    /// through untouched.
    pub fn resolve(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else if target.starts_with('/') {
            format!("{}{}", self.base_url, target)
        } else {
            format!("{}/{}", self.base_url, target)
        }
    }

    /// Whether `url` addresses the given endpoint, ignoring query and fragment.
    pub fn is_endpoint(&self, url: &str, endpoint: Endpoint) -> bool {
        let bare = url.split(['?', '#']).next().unwrap_or(url);
        bare.trim_end_matches('/') == self.endpoint_url(endpoint)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn logoff_timeout(&self) -> Duration {
        Duration::from_secs(self.logoff_timeout_secs)
    }
}

/// Called after listeners whenever an active session is torn down.
pub type AbortCallback = Arc<dyn Fn() + Send + Sync>;

/// Everything `configure` can set: the config plus the abort callback.
#[derive(Clone, Default)]
pub struct SessionOptions {
    pub config: AuthConfig,
    pub on_session_abort: Option<AbortCallback>,
}

impl SessionOptions {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config: config.normalized(),
            on_session_abort: None,
        }
    }

    pub fn on_session_abort<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_session_abort = Some(Arc::new(callback));
        self
    }
}

impl From<AuthConfig> for SessionOptions {
    fn from(config: AuthConfig) -> Self {
        Self::new(config)
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("config", &self.config)
            .field("on_session_abort", &self.on_session_abort.is_some())
            .finish()
    }
}
