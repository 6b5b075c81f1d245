//! Heartbeat monitor
//!
//! Classifies link quality from the age of the last pong. It never closes the
//! connection; liveness is only reported.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::HeartbeatConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Good,
    Fair,
    Poor,
    Disconnected,
    #[default]
    Unknown,
}

impl ConnectionQuality {
    /// Quality for a given pong age against the two thresholds.
    pub fn classify(age: Duration, good_within: Duration, fair_within: Duration) -> Self {
        if age < good_within {
            Self::Good
        } else if age < fair_within {
            Self::Fair
        } else {
            Self::Poor
        }
    }

    /// Classification with the default 15s / 30s thresholds.
    pub fn from_pong_age(age: Duration) -> Self {
        Self::classify(age, Duration::from_secs(15), Duration::from_secs(30))
    }
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => write!(f, "good"),
            Self::Fair => write!(f, "fair"),
            Self::Poor => write!(f, "poor"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    good_within: Duration,
    fair_within: Duration,
    last_pong_at: Option<Instant>,
    quality: ConnectionQuality,
    running: bool,
}

impl HeartbeatMonitor {
    pub fn new(config: &HeartbeatConfig) -> Self {
        Self {
            interval: config.interval(),
            good_within: Duration::from_millis(config.good_within_ms),
            fair_within: Duration::from_millis(config.fair_within_ms),
            last_pong_at: None,
            quality: ConnectionQuality::Unknown,
            running: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn quality(&self) -> ConnectionQuality {
        self.quality
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn last_pong_at(&self) -> Option<Instant> {
        self.last_pong_at
    }

    /// Begin monitoring a freshly opened link. The open counts as a pong.
    pub fn start(&mut self, now: Instant) -> Option<ConnectionQuality> {
        self.running = true;
        self.last_pong_at = Some(now);
        self.set(ConnectionQuality::Good)
    }

    pub fn stop(&mut self) -> Option<ConnectionQuality> {
        self.running = false;
        self.last_pong_at = None;
        self.set(ConnectionQuality::Unknown)
    }

    pub fn on_pong(&mut self, now: Instant) -> Option<ConnectionQuality> {
        if !self.running {
            return None;
        }
        self.last_pong_at = Some(now);
        self.evaluate(now)
    }

    /// Periodic re-classification, run alongside each ping.
    pub fn tick(&mut self, now: Instant) -> Option<ConnectionQuality> {
        if !self.running {
            return None;
        }
        self.evaluate(now)
    }

    /// Retry budget gone or link torn down on purpose.
    pub fn force_disconnected(&mut self) -> Option<ConnectionQuality> {
        self.running = false;
        self.set(ConnectionQuality::Disconnected)
    }

    fn evaluate(&mut self, now: Instant) -> Option<ConnectionQuality> {
        let age = self
            .last_pong_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);
        let quality = ConnectionQuality::classify(age, self.good_within, self.fair_within);
        self.set(quality)
    }

    /// Returns the new value only when it changed.
    fn set(&mut self, quality: ConnectionQuality) -> Option<ConnectionQuality> {
        if self.quality == quality {
            return None;
        }
        self.quality = quality;
        Some(quality)
    }
}
