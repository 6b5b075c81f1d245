//! Sync client configuration.
//!
//! Loaded from TOML (all fields optional), then overridden from `FEEDSYNC_*`
//! environment variables. Unparseable env values keep the current setting.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::WireFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which feed a client instance serves. Both share one design; they differ in
/// what the subscription selector means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Order-book / option-chain data; selector is an expiry timestamp.
    #[default]
    OptionChain,
    /// OHLC chart data; selector is a candle interval.
    Chart,
}

impl FeedKind {
    /// Query parameter carrying the selector on the REST fallback.
    pub fn selector_param(&self) -> &'static str {
        match self {
            Self::OptionChain => "expiry",
            Self::Chart => "interval",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OptionChain => write!(f, "option_chain"),
            Self::Chart => write!(f, "chart"),
        }
    }
}

impl FromStr for FeedKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "option_chain" | "optionchain" | "chain" => Ok(Self::OptionChain),
            "chart" | "ohlc" => Ok(Self::Chart),
            other => Err(ConfigError::Invalid(format!("unknown feed kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    /// Pong age below which quality is `good`.
    pub good_within_ms: u64,
    /// Pong age below which quality is `fair`; at or above it is `poor`.
    pub fair_within_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 15_000,
            good_within_ms: 15_000,
            fair_within_ms: 30_000,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub ws_url: String,
    pub rest_url: String,
    pub feed: FeedKind,
    pub wire_format: WireFormat,
    pub connect_timeout_ms: u64,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub poll: PollConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8080/ws".to_string(),
            rest_url: "http://127.0.0.1:8080/api/snapshot".to_string(),
            feed: FeedKind::default(),
            wire_format: WireFormat::default(),
            connect_timeout_ms: 10_000,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Defaults overridden from environment
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("FEEDSYNC_WS_URL") {
            self.ws_url = v;
        }
        if let Ok(v) = std::env::var("FEEDSYNC_REST_URL") {
            self.rest_url = v;
        }
        if let Ok(v) = std::env::var("FEEDSYNC_FEED") {
            self.feed = v.parse().unwrap_or(self.feed);
        }
        if let Ok(v) = std::env::var("FEEDSYNC_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = v.parse().unwrap_or(self.connect_timeout_ms);
        }
        if let Ok(v) = std::env::var("FEEDSYNC_MAX_RECONNECT_ATTEMPTS") {
            self.reconnect.max_attempts = v.parse().unwrap_or(self.reconnect.max_attempts);
        }
        if let Ok(v) = std::env::var("FEEDSYNC_BACKOFF_BASE_MS") {
            self.reconnect.base_delay_ms = v.parse().unwrap_or(self.reconnect.base_delay_ms);
        }
        if let Ok(v) = std::env::var("FEEDSYNC_BACKOFF_MAX_MS") {
            self.reconnect.max_delay_ms = v.parse().unwrap_or(self.reconnect.max_delay_ms);
        }
        if let Ok(v) = std::env::var("FEEDSYNC_HEARTBEAT_MS") {
            self.heartbeat.interval_ms = v.parse().unwrap_or(self.heartbeat.interval_ms);
        }
        if let Ok(v) = std::env::var("FEEDSYNC_POLL_INTERVAL_MS") {
            self.poll.interval_ms = v.parse().unwrap_or(self.poll.interval_ms);
        }

        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_url.trim().is_empty() {
            return Err(ConfigError::Invalid("ws_url is empty".into()));
        }
        if self.rest_url.trim().is_empty() {
            return Err(ConfigError::Invalid("rest_url is empty".into()));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::Invalid("reconnect.max_attempts must be > 0".into()));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.base_delay_ms exceeds reconnect.max_delay_ms".into(),
            ));
        }
        if self.heartbeat.interval_ms == 0 || self.poll.interval_ms == 0 {
            return Err(ConfigError::Invalid("intervals must be non-zero".into()));
        }
        if self.heartbeat.good_within_ms > self.heartbeat.fair_within_ms {
            return Err(ConfigError::Invalid(
                "heartbeat.good_within_ms exceeds heartbeat.fair_within_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
