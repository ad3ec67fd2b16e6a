//! Environment-level configuration shared by the HTTP and realtime clients.

use std::time::Duration;

use thiserror::Error;

use crate::poller::RefreshIntervals;
use crate::retry::ReconnectPolicy;

/// Environment variable holding the HTTP API base URL.
pub const API_URL_ENV: &str = "DASHBOARD_API_URL";
/// Environment variable holding the request timeout in milliseconds.
pub const API_TIMEOUT_ENV: &str = "DASHBOARD_API_TIMEOUT_MS";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DashboardDefaults;

impl DashboardDefaults {
    pub const API_BASE_URL: &'static str = "http://localhost:3001/api";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive number of milliseconds, got {value:?}")]
    InvalidTimeout { var: &'static str, value: String },

    #[error("{var} must be an http(s) URL, got {value:?}")]
    InvalidUrl { var: &'static str, value: String },
}

/// Top-level settings for one dashboard process.
///
/// Construct once at startup and derive the client options from it.
#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub refresh: RefreshIntervals,
    /// Extra headers attached to every HTTP call.
    pub default_headers: Vec<(String, String)>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_base_url: DashboardDefaults::API_BASE_URL.to_string(),
            request_timeout: DashboardDefaults::REQUEST_TIMEOUT,
            connect_timeout: DashboardDefaults::CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            refresh: RefreshIntervals::default(),
            default_headers: Vec::new(),
        }
    }
}

impl DashboardConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unset or blank keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = non_blank(lookup(API_URL_ENV)) {
            config.api_base_url = parse_base_url(&url)?;
        }

        if let Some(raw) = non_blank(lookup(API_TIMEOUT_ENV)) {
            config.request_timeout = parse_timeout_ms(&raw)?;
        }

        Ok(config)
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end().to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_base_url(value: &str) -> Result<String, ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Ok(value.to_string());
    }
    Err(ConfigError::InvalidUrl {
        var: API_URL_ENV,
        value: value.to_string(),
    })
}

fn parse_timeout_ms(value: &str) -> Result<Duration, ConfigError> {
    match value.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::InvalidTimeout {
            var: API_TIMEOUT_ENV,
            value: value.to_string(),
        }),
    }
}
