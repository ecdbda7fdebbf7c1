//! Process configuration from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use cmdproc_infra::RetryPolicy;

pub const EVENT_DB_URL_VAR: &str = "CMDPROC_EVENT_DB_URL";
pub const READ_MODEL_URLS_VAR: &str = "CMDPROC_READ_MODEL_URLS";
pub const RETRY_DELAY_VAR: &str = "CMDPROC_RETRY_DELAY_MS";
pub const REPROCESS_DELAY_VAR: &str = "CMDPROC_REPROCESS_DELAY_MS";
pub const STATUS_ADDR_VAR: &str = "CMDPROC_STATUS_ADDR";

const DEFAULT_EVENT_DB_URL: &str = "http://event-db:3000";
const DEFAULT_READ_MODEL_URL: &str = "http://object-reducer:3000";
const DEFAULT_STATUS_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}: at least one URL is required")]
    Empty(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub event_db_url: String,
    /// The first entry serves object reads; all of them are waited on for catch-up.
    pub read_model_urls: Vec<String>,
    pub retry: RetryPolicy,
    pub reprocess_delay: Duration,
    /// `None` disables the status endpoint.
    pub status_addr: Option<SocketAddr>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            event_db_url: DEFAULT_EVENT_DB_URL.to_string(),
            read_model_urls: vec![DEFAULT_READ_MODEL_URL.to_string()],
            retry: RetryPolicy::default(),
            reprocess_delay: Duration::from_millis(100),
            status_addr: DEFAULT_STATUS_ADDR.parse().ok(),
        }
    }
}

impl ProcessorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(EVENT_DB_URL_VAR) {
            let url = url.trim();
            if url.is_empty() {
                return Err(ConfigError::Empty(EVENT_DB_URL_VAR));
            }
            config.event_db_url = url.to_string();
        }

        if let Some(raw) = lookup(READ_MODEL_URLS_VAR) {
            let urls: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
            if urls.is_empty() {
                return Err(ConfigError::Empty(READ_MODEL_URLS_VAR));
            }
            config.read_model_urls = urls;
        }

        if let Some(raw) = lookup(RETRY_DELAY_VAR) {
            config.retry = RetryPolicy::forever(parse_millis(RETRY_DELAY_VAR, &raw)?);
        }

        if let Some(raw) = lookup(REPROCESS_DELAY_VAR) {
            config.reprocess_delay = parse_millis(REPROCESS_DELAY_VAR, &raw)?;
        }

        if let Some(raw) = lookup(STATUS_ADDR_VAR) {
            let raw = raw.trim();
            config.status_addr = if raw.is_empty() {
                None
            } else {
                Some(raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                    var: STATUS_ADDR_VAR,
                    value: raw.to_string(),
                    reason: e.to_string(),
                })?)
            };
        }

        Ok(config)
    }

    pub fn with_event_db_url(mut self, url: impl Into<String>) -> Self {
        self.event_db_url = url.into();
        self
    }

    pub fn with_read_model_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.read_model_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Fixed delay, never give up.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry = RetryPolicy::forever(delay);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reprocess_delay(mut self, delay: Duration) -> Self {
        self.reprocess_delay = delay;
        self
    }

    pub fn with_status_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.status_addr = addr;
        self
    }
}

fn parse_millis(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}
