use std::time::Duration;

use thiserror::Error;

/// Environment variable holding the backend base URL.
pub const API_URL_VAR: &str = "MYCOLOG_API_URL";
/// Environment variable holding the request timeout in seconds.
pub const TIMEOUT_VAR: &str = "MYCOLOG_TIMEOUT_SECS";

const DEFAULT_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error raised while loading a [`ClientConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{API_URL_VAR} is not set")]
    MissingBaseUrl,

    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid {TIMEOUT_VAR} value {0:?}")]
    InvalidTimeout(String),
}

/// Configuration for the HTTP transport.
///
/// Resource paths are appended verbatim to `base_url`, so the base URL
/// should not end with a slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend base URL, e.g. `https://api.example.com`.
    pub base_url: String,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Value sent in the `User-Agent` header.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: default_user_agent(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration for the given base URL with default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] if `base_url` is not an
    /// absolute http(s) URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ConfigError> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            ..Self::default()
        })
    }

    /// Loads the configuration from `MYCOLOG_API_URL` and the optional
    /// `MYCOLOG_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is missing or invalid, or if the
    /// timeout is not a whole number of seconds.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var(API_URL_VAR).map_err(|_| ConfigError::MissingBaseUrl)?;
        let mut config = Self::new(base_url)?;

        if let Ok(raw) = std::env::var(TIMEOUT_VAR) {
            config.timeout = parse_timeout(&raw)?;
        }

        Ok(config)
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn normalize_base_url(raw: String) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/').to_string();
    let parsed = url::Url::parse(&trimmed).map_err(|e| ConfigError::InvalidBaseUrl {
        url: raw.clone(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            url: raw,
            reason: format!("unsupported scheme {}", parsed.scheme()),
        });
    }

    Ok(trimmed)
}

fn parse_timeout(raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidTimeout(raw.to_string()))
}
