//! Client configuration
//!
//! `ClientConfig` describes how to reach the ticket service,
//! `SyncConfig` how aggressively the cache keeps itself fresh.
//!
//! # Environment variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | DESK_API_URL | http://localhost:8000 | Ticket service base URL |
//! | DESK_API_TOKEN | (none) | Bearer token attached to every call |
//! | DESK_API_TIMEOUT_SECS | 30 | Transport timeout |
//! | DESK_LIST_POLL_MS | 10000 | Ticket list refresh interval |
//! | DESK_DETAIL_POLL_MS | 5000 | Ticket detail refresh interval |
//! | DESK_STALE_MS | 5000 | Age after which cached data is refetched on watch |

use crate::http::HttpClient;
use crate::{ClientResult, SyncError};
use std::time::Duration;

/// Client configuration for connecting to the ticket service
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL (e.g., "http://localhost:8000")
    pub base_url: String,

    /// Bearer token for authentication
    pub token: Option<String>,

    /// Request timeout in seconds
    pub timeout: u64,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: 30,
        }
    }

    /// Load configuration from `DESK_API_*` environment variables
    pub fn from_env() -> Self {
        let mut config =
            Self::new(std::env::var("DESK_API_URL").unwrap_or_else(|_| "http://localhost:8000".into()));
        config.token = std::env::var("DESK_API_TOKEN").ok().filter(|t| !t.is_empty());
        config.timeout = env_parse("DESK_API_TIMEOUT_SECS").unwrap_or(config.timeout);
        config
    }

    /// Set the bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Create an HTTP client from this configuration
    pub fn build_http_client(&self) -> ClientResult<HttpClient> {
        HttpClient::new(self)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:8000")
    }
}

/// Synchronization tuning
///
/// Every timing the core depends on lives here so tests can drive it with
/// virtual time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Refresh interval of ticket list keys
    pub list_poll_interval: Duration,
    /// Refresh interval of single-ticket keys (conversations move faster)
    pub detail_poll_interval: Duration,
    /// Cached data younger than this is served without a new read when a
    /// view starts watching
    pub stale_time: Duration,
    /// Extra attempts for a failed read. Writes are never retried.
    pub read_retries: u32,
    /// Pause before a read retry
    pub retry_delay: Duration,
    /// Upper bound for a single remote read
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            list_poll_interval: Duration::from_secs(10),
            detail_poll_interval: Duration::from_secs(5),
            stale_time: Duration::from_secs(5),
            read_retries: 1,
            retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `DESK_*_MS` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            list_poll_interval: env_millis("DESK_LIST_POLL_MS")
                .unwrap_or(defaults.list_poll_interval),
            detail_poll_interval: env_millis("DESK_DETAIL_POLL_MS")
                .unwrap_or(defaults.detail_poll_interval),
            stale_time: env_millis("DESK_STALE_MS").unwrap_or(defaults.stale_time),
            ..defaults
        }
    }

    pub fn with_list_poll_interval(mut self, interval: Duration) -> Self {
        self.list_poll_interval = interval;
        self
    }

    pub fn with_detail_poll_interval(mut self, interval: Duration) -> Self {
        self.detail_poll_interval = interval;
        self
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_read_retries(mut self, retries: u32) -> Self {
        self.read_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Reject configurations the poller cannot run with
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.list_poll_interval.is_zero() || self.detail_poll_interval.is_zero() {
            return Err(SyncError::InvalidInput(
                "poll intervals must be non-zero".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(SyncError::InvalidInput(
                "request timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}
