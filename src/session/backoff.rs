//! Exponential reconnect backoff with jitter and a bounded attempt budget.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempt: u32,
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_ms: u64,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter_ms: config.jitter_ms,
        }
    }

    /// `min(base * 2^n, max)` without jitter
    pub fn base_delay(&self, n: u32) -> Duration {
        let factor = 1u64.checked_shl(n).unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Delay for attempt `n` with an explicit jitter sample in `[0, jitter_ms)`.
    pub fn delay_with_jitter(&self, n: u32, jitter_ms: u64) -> Duration {
        self.base_delay(n) + Duration::from_millis(jitter_ms)
    }

    /// Delay for the current attempt. Does not advance the counter.
    pub fn next_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..self.jitter_ms)
        };
        self.delay_with_jitter(self.attempt, jitter)
    }

    /// Record a scheduled retry.
    pub fn advance(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
    }

    /// True if one more failure uses up the budget.
    ///
    /// The failure that brings the count to `max_attempts` goes to `Failed` rather than
    /// scheduling a retry, so `max_attempts = N` allows N-1 reconnects and `delay(N-1)` is
    /// never used. With the default of 10 the tenth consecutive unclean close is terminal.
    pub fn would_exhaust(&self) -> bool {
        self.attempt.saturating_add(1) >= self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Reset on successful connection or explicit connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Burn the remaining budget so nothing reconnects after an intentional disconnect.
    pub fn exhaust(&mut self) {
        self.attempt = self.max_attempts;
    }
}
