//! Fallback Poller
//!
//! Fetches the desired instrument over request/response while the stream is not
//! usable. Polling and a healthy subscription are mutually exclusive:
//! polling runs iff NOT (connected AND current == desired AND no error).
//!
//! Each activation gets a new generation. Fetch results are tagged with the
//! generation they were issued under and dropped if polling stopped since.

pub mod rest;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::effect::Effect;
use crate::error::SyncError;
use crate::metrics::SyncMetrics;
use crate::subscription::SubscriptionKey;

pub use rest::RestSnapshotFetcher;

/// Request/response source for one instrument snapshot.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self, key: &SubscriptionKey) -> anyhow::Result<Value>;
}

/// Polling activation rule.
///
/// `engaged` is false before the first `connect()` and after `disconnect()`.
pub fn should_poll(engaged: bool, connected: bool, synced: bool, has_error: bool) -> bool {
    engaged && !(connected && synced && !has_error)
}

#[derive(Debug)]
pub struct FallbackPoller {
    interval: Duration,
    active: bool,
    generation: u64,
    in_flight: bool,
    metrics: Arc<SyncMetrics>,
}

impl FallbackPoller {
    pub fn new(config: &PollConfig, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            interval: config.interval(),
            active: false,
            generation: 0,
            in_flight: false,
            metrics,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Start or stop to match the activation rule.
    pub fn evaluate(&mut self, should: bool, fx: &mut Vec<Effect>) {
        match (self.active, should) {
            (false, true) => {
                self.generation += 1;
                self.active = true;
                self.in_flight = false;
                info!(
                    generation = self.generation,
                    interval_ms = self.interval.as_millis() as u64,
                    "📡 Starting fallback polling"
                );
                fx.push(Effect::StartPolling(self.interval));
            }
            (true, false) => self.halt(fx),
            _ => {}
        }
    }

    pub fn halt(&mut self, fx: &mut Vec<Effect>) {
        if !self.active {
            return;
        }
        self.active = false;
        self.in_flight = false;
        info!(generation = self.generation, "⏹️ Stopping fallback polling");
        fx.push(Effect::StopPolling);
    }

    /// Poll interval fired.
    pub fn on_tick(&mut self, desired: Option<&SubscriptionKey>, fx: &mut Vec<Effect>) {
        if !self.active {
            return;
        }
        if self.in_flight {
            debug!("previous fetch still running, skipping tick");
            return;
        }
        let Some(key) = desired else {
            return;
        };

        self.in_flight = true;
        self.metrics.record_poll_tick();
        fx.push(Effect::Fetch {
            key: key.clone(),
            generation: self.generation,
        });
    }

    /// A fetch finished. Delivers only if it belongs to the live activation and key.
    pub fn on_result(
        &mut self,
        generation: u64,
        key: &SubscriptionKey,
        result: Result<Value, SyncError>,
        desired: Option<&SubscriptionKey>,
        fx: &mut Vec<Effect>,
    ) {
        if !self.active || generation != self.generation {
            self.metrics.record_stale_poll_result();
            debug!(generation, live = self.generation, "dropping stale poll result");
            return;
        }
        self.in_flight = false;

        if desired != Some(key) {
            self.metrics.record_stale_poll_result();
            debug!(subscription = %key, "dropping poll result for a subscription we no longer want");
            return;
        }

        match result {
            Ok(payload) => {
                self.metrics.record_poll_delivery();
                fx.push(Effect::Deliver(payload));
            }
            Err(e) => {
                self.metrics.record_poll_failure();
                warn!(subscription = %key, error = %e, "⚠️ Poll failed, retrying next interval");
            }
        }
    }
}
