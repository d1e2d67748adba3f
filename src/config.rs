//! Proxy configuration
//!
//! Built from a plain JS object on the page side (camelCase keys, every key
//! optional) or directly in Rust. Missing fields take the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broker::DEFAULT_BROKER_URL;
use crate::error::{Result, SnowflakeError};
use crate::rate_limiter::{RateLimiterConfig, DEFAULT_RATE_LIMIT_HISTORY, MIN_RATE_LIMIT};
use crate::transport::RelayTarget;

/// Poll interval for a proxy someone is watching (browser tab, extension)
pub const INTERACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Poll interval for headless, always-on deployments
pub const UNATTENDED_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_RELAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest delay a browser timer accepts (`setTimeout` takes an i32)
pub const MAX_TIMER_DELAY_MS: u64 = i32::MAX as u64;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Kind of deployment, which selects the default poll interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
    #[default]
    Interactive,
    Unattended,
}

impl Deployment {
    pub fn poll_interval(&self) -> Duration {
        match self {
            Deployment::Interactive => INTERACTIVE_POLL_INTERVAL,
            Deployment::Unattended => UNATTENDED_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    pub broker_url: String,
    pub relay: RelayTarget,
    /// Relay-class tag reported to the broker
    pub proxy_type: String,
    pub deployment: Deployment,
    /// Overrides the deployment's poll interval
    pub poll_interval_ms: Option<u64>,
    /// Aggregate byte rate in bytes/second; unset disables limiting
    pub rate_limit_bytes: Option<u64>,
    pub rate_limit_history_secs: f64,
    pub max_num_clients: usize,
    pub connections_per_client: usize,
    pub setup_timeout_ms: u64,
    pub relay_connect_timeout_ms: u64,
    pub ice_servers: Vec<String>,
    /// Keep private-address host candidates in the answer
    pub keep_local_addresses: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            relay: RelayTarget::default(),
            proxy_type: "webext".to_string(),
            deployment: Deployment::Interactive,
            poll_interval_ms: None,
            rate_limit_bytes: None,
            rate_limit_history_secs: DEFAULT_RATE_LIMIT_HISTORY.as_secs_f64(),
            max_num_clients: 1,
            connections_per_client: 1,
            setup_timeout_ms: DEFAULT_SETUP_TIMEOUT.as_millis() as u64,
            relay_connect_timeout_ms: DEFAULT_RELAY_CONNECT_TIMEOUT.as_millis() as u64,
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            keep_local_addresses: false,
        }
    }
}

impl ProxyConfig {
    /// Headless defaults
    pub fn unattended() -> Self {
        Self {
            deployment: Deployment::Unattended,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SnowflakeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.deployment.poll_interval())
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn relay_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_connect_timeout_ms)
    }

    /// Total number of pairs allowed to exist at once
    pub fn capacity(&self) -> usize {
        self.max_num_clients
            .saturating_mul(self.connections_per_client)
    }

    pub fn rate_limit(&self) -> Option<RateLimiterConfig> {
        self.rate_limit_bytes.map(|bytes_per_second| RateLimiterConfig {
            bytes_per_second,
            window: self.rate_limit_history().unwrap_or(DEFAULT_RATE_LIMIT_HISTORY),
        })
    }

    fn rate_limit_history(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.rate_limit_history_secs)
            .ok()
            .filter(|window| !window.is_zero())
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker_url.trim().is_empty() {
            return Err(SnowflakeError::InvalidUrl("empty broker URL".into()));
        }
        if self.relay.host.trim().is_empty() {
            return Err(SnowflakeError::InvalidUrl("empty relay host".into()));
        }
        if self.relay.port == 0 {
            return Err(SnowflakeError::InvalidUrl("relay port 0".into()));
        }
        if self.max_num_clients == 0 {
            return Err(SnowflakeError::Config("maxNumClients must be at least 1".into()));
        }
        if self.connections_per_client == 0 {
            return Err(SnowflakeError::Config(
                "connectionsPerClient must be at least 1".into(),
            ));
        }
        if let Some(rate) = self.rate_limit_bytes {
            if rate < MIN_RATE_LIMIT {
                return Err(SnowflakeError::Config(format!(
                    "rate limit must be at least {} bytes/s",
                    MIN_RATE_LIMIT
                )));
            }
        }
        if self.rate_limit_history().is_none() {
            return Err(SnowflakeError::Config(format!(
                "rateLimitHistorySecs out of range: {}",
                self.rate_limit_history_secs
            )));
        }
        let timers = [
            ("pollIntervalMs", self.poll_interval_ms),
            ("setupTimeoutMs", Some(self.setup_timeout_ms)),
            ("relayConnectTimeoutMs", Some(self.relay_connect_timeout_ms)),
        ];
        for (name, value) in timers {
            if let Some(ms) = value {
                if ms == 0 || ms > MAX_TIMER_DELAY_MS {
                    return Err(SnowflakeError::Config(format!(
                        "{} must be between 1 and {}",
                        name, MAX_TIMER_DELAY_MS
                    )));
                }
            }
        }
        Ok(())
    }
}
