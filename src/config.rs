//! Client configuration, with overrides from `APIKIT_*` environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use reqwest::Client;
use reqwest::header::HeaderMap;

use crate::error::{Error, Result};
use crate::retry::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
    RetryPolicy,
};

pub const ENV_TIMEOUT_MS: &str = "APIKIT_TIMEOUT_MS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "APIKIT_CONNECT_TIMEOUT_MS";
pub const ENV_USER_AGENT: &str = "APIKIT_USER_AGENT";
pub const ENV_MAX_ATTEMPTS: &str = "APIKIT_MAX_ATTEMPTS";
pub const ENV_INITIAL_DELAY_MS: &str = "APIKIT_INITIAL_DELAY_MS";
pub const ENV_MAX_DELAY_MS: &str = "APIKIT_MAX_DELAY_MS";
pub const ENV_BACKOFF_MULTIPLIER: &str = "APIKIT_BACKOFF_MULTIPLIER";

/// Unvalidated retry settings; see [`ClientConfig::retry_policy`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicySettings {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Total request timeout
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub user_agent: String,
    /// Headers sent with every request
    pub default_headers: HeaderMap,
    pub retry: RetryPolicySettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            connect_timeout: Some(Duration::from_secs(10)),
            user_agent: concat!("apikit/", env!("CARGO_PKG_VERSION")).to_string(),
            default_headers: HeaderMap::new(),
            retry: RetryPolicySettings::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by any `APIKIT_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_TIMEOUT_MS)? {
            config.timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_CONNECT_TIMEOUT_MS)? {
            config.connect_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(user_agent) = lookup(ENV_USER_AGENT).filter(|v| !v.trim().is_empty()) {
            config.user_agent = user_agent;
        }
        if let Some(attempts) = parse_var(&lookup, ENV_MAX_ATTEMPTS)? {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_INITIAL_DELAY_MS)? {
            config.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_MAX_DELAY_MS)? {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) = parse_var(&lookup, ENV_BACKOFF_MULTIPLIER)? {
            config.retry.backoff_multiplier = multiplier;
        }

        debug!("Loaded client config: {:?}", config);
        Ok(config)
    }

    /// Builds the `reqwest::Client` used by the default transport.
    pub fn build_reqwest_client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .user_agent(self.user_agent.as_str())
            .default_headers(self.default_headers.clone());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = self.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        Ok(builder.build()?)
    }

    /// Validates the retry settings into a [`RetryPolicy`].
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(
            self.retry.max_attempts,
            self.retry.initial_delay,
            self.retry.max_delay,
            self.retry.backoff_multiplier,
        )
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e| Error::Configuration(format!("Invalid value {:?} for {}: {}", raw, name, e)))
}
