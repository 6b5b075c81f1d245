//! Sync client counters.
//!
//! Shared between the worker and the facade through an `Arc`. Relaxed atomics only;
//! nothing orders on these values.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct SyncMetrics {
    pub connect_attempts: AtomicU64,
    pub connect_successes: AtomicU64,
    pub reconnects_scheduled: AtomicU64,
    pub retries_exhausted: AtomicU64,
    pub frames_received: AtomicU64,
    pub decode_errors: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub data_forwarded: AtomicU64,
    pub pings_sent: AtomicU64,
    pub poll_ticks: AtomicU64,
    pub poll_failures: AtomicU64,
    pub poll_deliveries: AtomicU64,
    pub stale_poll_results: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncMetricsSnapshot {
    pub connect_attempts: u64,
    pub connect_successes: u64,
    pub reconnects_scheduled: u64,
    pub retries_exhausted: u64,
    pub frames_received: u64,
    pub decode_errors: u64,
    pub protocol_errors: u64,
    pub data_forwarded: u64,
    pub pings_sent: u64,
    pub poll_ticks: u64,
    pub poll_failures: u64,
    pub poll_deliveries: u64,
    pub stale_poll_results: u64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connect_success(&self) {
        self.connect_successes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_retries_exhausted(&self) {
        self.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_data_forwarded(&self) {
        self.data_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ping(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_poll_tick(&self) {
        self.poll_ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_poll_delivery(&self) {
        self.poll_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale_poll_result(&self) {
        self.stale_poll_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_successes: self.connect_successes.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            data_forwarded: self.data_forwarded.load(Ordering::Relaxed),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            poll_ticks: self.poll_ticks.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            poll_deliveries: self.poll_deliveries.load(Ordering::Relaxed),
            stale_poll_results: self.stale_poll_results.load(Ordering::Relaxed),
        }
    }

    /// Summary string for logging
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "connects={}/{} reconnects={} exhausted={} frames={} decode_errors={} protocol_errors={} data={} polls={}/{} poll_failures={} stale_polls={}",
            s.connect_successes,
            s.connect_attempts,
            s.reconnects_scheduled,
            s.retries_exhausted,
            s.frames_received,
            s.decode_errors,
            s.protocol_errors,
            s.data_forwarded,
            s.poll_deliveries,
            s.poll_ticks,
            s.poll_failures,
            s.stale_poll_results,
        )
    }
}
