//! Synchronous composition of supervisor, coordinator and poller.
//!
//! Feed it inputs, then drain [`Effect`]s with [`SyncEngine::take_effects`].
//! No I/O, no clocks of its own: `now` is passed in.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::effect::Effect;
use crate::error::SyncError;
use crate::metrics::SyncMetrics;
use crate::poller::{should_poll, FallbackPoller};
use crate::session::{
    ConnectionQuality, ConnectionState, ConnectionSupervisor, SessionEvent,
};
use crate::subscription::{SubscriptionCoordinator, SubscriptionKey};
use crate::transport::TransportEvent;

/// Published view of the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub state: ConnectionState,
    pub quality: ConnectionQuality,
    pub current_subscription: Option<SubscriptionKey>,
    pub desired_subscription: Option<SubscriptionKey>,
    pub last_error: Option<String>,
    pub client_id: Option<String>,
    pub polling: bool,
    /// Last payload handed to the consumer, ms since epoch.
    pub last_data_at_ms: Option<i64>,
}

impl SyncStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

#[derive(Debug)]
pub struct SyncEngine {
    supervisor: ConnectionSupervisor,
    coordinator: SubscriptionCoordinator,
    poller: FallbackPoller,
    /// Between `connect()` and `disconnect()`.
    engaged: bool,
    last_data_at_ms: Option<i64>,
    metrics: Arc<SyncMetrics>,
    effects: Vec<Effect>,
}

impl SyncEngine {
    pub fn new(config: &SyncConfig, metrics: Arc<SyncMetrics>) -> Self {
        Self::from_supervisor(
            config,
            ConnectionSupervisor::new(config, metrics.clone()),
            metrics,
        )
    }

    pub fn with_seed(config: &SyncConfig, metrics: Arc<SyncMetrics>, seed: u64) -> Self {
        Self::from_supervisor(
            config,
            ConnectionSupervisor::with_seed(config, metrics.clone(), seed),
            metrics,
        )
    }

    fn from_supervisor(
        config: &SyncConfig,
        supervisor: ConnectionSupervisor,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            supervisor,
            coordinator: SubscriptionCoordinator::new(),
            poller: FallbackPoller::new(&config.poll, metrics.clone()),
            engaged: false,
            last_data_at_ms: None,
            metrics,
            effects: Vec::new(),
        }
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn coordinator(&self) -> &SubscriptionCoordinator {
        &self.coordinator
    }

    pub fn poller(&self) -> &FallbackPoller {
        &self.poller
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.supervisor.state(),
            quality: self.supervisor.quality(),
            current_subscription: self.coordinator.current().cloned(),
            desired_subscription: self.coordinator.desired().cloned(),
            last_error: self.supervisor.last_error().map(|e| e.to_string()),
            client_id: self.supervisor.client_id().map(str::to_string),
            polling: self.poller.is_active(),
            last_data_at_ms: self.last_data_at_ms,
        }
    }

    pub fn connect(&mut self) {
        self.engaged = true;
        self.supervisor.connect(&mut self.effects);
        self.settle();
    }

    pub fn disconnect(&mut self) {
        self.engaged = false;
        self.supervisor.disconnect(&mut self.effects);
        self.coordinator.on_connection_lost();
        self.settle();
    }

    pub fn set_desired(&mut self, key: Option<SubscriptionKey>) {
        let connected = self.supervisor.is_connected();
        self.coordinator
            .set_desired(key, connected, &mut self.effects);
        self.settle();
    }

    pub fn on_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Opened => self.supervisor.on_open(now, &mut self.effects),
            TransportEvent::Frame(frame) => {
                if let Err(e) = self.supervisor.on_frame(&frame, now) {
                    warn!(error = %e, bytes = frame.len(), "dropping undecodable frame");
                }
            }
            TransportEvent::Closed { code, clean } => {
                self.supervisor.on_close(code, clean, &mut self.effects)
            }
            TransportEvent::Error(message) => {
                self.supervisor.on_transport_error(message, &mut self.effects)
            }
        }
        self.settle();
    }

    pub fn on_reconnect_due(&mut self) {
        self.supervisor.on_reconnect_due(&mut self.effects);
        self.settle();
    }

    pub fn on_heartbeat_due(&mut self, now: Instant) {
        self.supervisor.on_heartbeat_due(now, &mut self.effects);
        self.settle();
    }

    pub fn on_poll_tick(&mut self) {
        self.poller
            .on_tick(self.coordinator.desired(), &mut self.effects);
    }

    pub fn on_poll_result(
        &mut self,
        generation: u64,
        key: &SubscriptionKey,
        result: Result<Value, SyncError>,
    ) {
        let before = self.effects.len();
        self.poller.on_result(
            generation,
            key,
            result,
            self.coordinator.desired(),
            &mut self.effects,
        );
        if self.effects.len() > before {
            self.touch_data();
        }
    }

    /// Apply queued session events, then re-check polling.
    fn settle(&mut self) {
        while let Some(event) = self.supervisor.pop_event() {
            match event {
                SessionEvent::StateChanged { from, to } => {
                    if from == ConnectionState::Connected {
                        self.coordinator.on_connection_lost();
                    }
                    if to == ConnectionState::Connected {
                        self.coordinator.reconcile(true, &mut self.effects);
                    }
                }
                SessionEvent::Subscribed(key) => {
                    if self.coordinator.on_subscribed(&key) {
                        self.supervisor.clear_error();
                    }
                }
                SessionEvent::Unsubscribed => self.coordinator.on_unsubscribed(),
                SessionEvent::Data(payload) => {
                    self.metrics.record_data_forwarded();
                    self.touch_data();
                    self.effects.push(Effect::Deliver(payload));
                }
                SessionEvent::QualityChanged(quality) => {
                    debug!(quality = %quality, "quality changed");
                }
                SessionEvent::ErrorRaised(_) | SessionEvent::ErrorCleared => {}
            }
        }

        let should = should_poll(
            self.engaged,
            self.supervisor.is_connected(),
            self.coordinator.is_synced(),
            self.supervisor.last_error().is_some(),
        );
        self.poller.evaluate(should, &mut self.effects);
    }

    fn touch_data(&mut self) {
        self.last_data_at_ms = Some(chrono::Utc::now().timestamp_millis());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientMessage, Frame};
    use serde_json::json;
    use std::time::Duration;

    fn engine() -> SyncEngine {
        SyncEngine::with_seed(&SyncConfig::default(), Arc::new(SyncMetrics::new()), 7)
    }

    fn sent(fx: &[Effect]) -> Vec<ClientMessage> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::Send(msg) if *msg != ClientMessage::Ping => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    fn text(s: &str) -> TransportEvent {
        TransportEvent::Frame(Frame::Text(s.to_string()))
    }

    fn open(engine: &mut SyncEngine) -> Vec<Effect> {
        engine.connect();
        engine.on_transport_event(TransportEvent::Opened, Instant::now());
        engine.take_effects()
    }

    fn key() -> SubscriptionKey {
        SubscriptionKey::new("NIFTY", "1700000000")
    }

    #[test]
    fn test_connected_ack_forwards_nothing() {
        let mut e = engine();
        open(&mut e);

        e.on_transport_event(text(r#"{"type":"connected","client_id":"abc"}"#), Instant::now());
        let fx = e.take_effects();
        assert!(!fx.iter().any(|x| matches!(x, Effect::Deliver(_))));
        assert!(e.status().is_connected());
        assert_eq!(e.status().client_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_subscribe_before_connect_sends_once_on_open() {
        let mut e = engine();
        e.set_desired(Some(key()));
        assert!(sent(&e.take_effects()).is_empty());

        let fx = open(&mut e);
        assert_eq!(sent(&fx), vec![ClientMessage::subscribe(&key())]);

        e.set_desired(Some(key()));
        assert!(sent(&e.take_effects()).is_empty());
    }

    #[test]
    fn test_polling_follows_subscription_health() {
        let mut e = engine();
        e.set_desired(Some(key()));
        assert!(!e.poller().is_active(), "never polls before connect()");

        let fx = open(&mut e);
        assert!(fx.contains(&Effect::StartPolling(Duration::from_millis(3_000))));
        assert!(e.status().polling);

        e.on_transport_event(
            text(r#"{"type":"subscribed","symbol":"NIFTY","expiry":1700000000}"#),
            Instant::now(),
        );
        let fx = e.take_effects();
        assert!(fx.contains(&Effect::StopPolling));
        assert_eq!(e.status().current_subscription, Some(key()));

        // Server error re-arms polling without touching the connection
        e.on_transport_event(text(r#"{"type":"error","message":"feed lagging"}"#), Instant::now());
        let fx = e.take_effects();
        assert!(fx.iter().any(|x| matches!(x, Effect::StartPolling(_))));
        assert!(e.status().is_connected());
        assert_eq!(e.status().last_error.as_deref(), Some("feed lagging"));
    }

    #[test]
    fn test_stale_poll_result_never_reaches_consumer() {
        let mut e = engine();
        e.set_desired(Some(key()));
        open(&mut e);
        e.on_poll_tick();
        let fetch = e
            .take_effects()
            .into_iter()
            .find_map(|x| match x {
                Effect::Fetch { key, generation } => Some((key, generation)),
                _ => None,
            })
            .expect("fetch issued");

        e.on_transport_event(
            text(r#"{"type":"subscribed","symbol":"NIFTY","expiry":"1700000000"}"#),
            Instant::now(),
        );
        e.take_effects();

        e.on_poll_result(fetch.1, &fetch.0, Ok(json!({"source": "rest"})));
        assert!(e.take_effects().is_empty());
    }

    #[test]
    fn test_switch_instrument_order() {
        let mut e = engine();
        e.set_desired(Some(key()));
        open(&mut e);
        e.on_transport_event(
            text(r#"{"type":"subscribed","symbol":"NIFTY","expiry":"1700000000"}"#),
            Instant::now(),
        );
        e.take_effects();

        let next = SubscriptionKey::new("BANKNIFTY", "1700600000");
        e.set_desired(Some(next.clone()));
        let fx = e.take_effects();
        assert_eq!(
            sent(&fx),
            vec![ClientMessage::Unsubscribe, ClientMessage::subscribe(&next)]
        );
        // Not synced until confirmed
        assert!(fx.iter().any(|x| matches!(x, Effect::StartPolling(_))));
    }

    #[test]
    fn test_exhaustion_leaves_poller_running() {
        let mut e = engine();
        e.set_desired(Some(key()));
        e.connect();
        for _ in 0..10 {
            e.on_transport_event(
                TransportEvent::Closed {
                    code: 1006,
                    clean: false,
                },
                Instant::now(),
            );
            e.on_reconnect_due();
        }

        let status = e.status();
        assert_eq!(status.state, ConnectionState::Failed);
        assert_eq!(status.quality, ConnectionQuality::Disconnected);
        assert_eq!(
            status.last_error.as_deref(),
            Some("Max reconnection attempts reached")
        );
        assert!(status.polling);
    }

    #[test]
    fn test_malformed_frame_mid_stream() {
        let mut e = engine();
        open(&mut e);

        e.on_transport_event(TransportEvent::Frame(Frame::Binary(vec![0xc1])), Instant::now());
        e.on_transport_event(text(r#"{"ltp":22450.5}"#), Instant::now());

        let delivered: Vec<Value> = e
            .take_effects()
            .into_iter()
            .filter_map(|x| match x {
                Effect::Deliver(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(delivered, vec![json!({"ltp": 22450.5})]);
        assert!(e.status().is_connected());
        assert!(e.status().last_error.is_none());
    }

    #[test]
    fn test_corrupted_binary_frames_never_reach_consumer() {
        let metrics = Arc::new(SyncMetrics::new());
        let mut e = SyncEngine::with_seed(&SyncConfig::default(), metrics.clone(), 7);
        open(&mut e);

        let mut padded = crate::protocol::codec::encode_binary(&json!({"ltp": 1})).unwrap();
        padded.extend_from_slice(&[0xc1, 0xc1, 0xff]);
        let frames = [
            Frame::Binary(br#"{"type":"error","message":"x"}"#.to_vec()),
            Frame::Binary(padded),
        ];
        for frame in frames {
            e.on_transport_event(TransportEvent::Frame(frame), Instant::now());
        }

        let fx = e.take_effects();
        assert!(
            !fx.iter().any(|x| matches!(x, Effect::Deliver(_))),
            "delivered {fx:?}"
        );
        assert_eq!(metrics.snapshot().decode_errors, 2);
        let status = e.status();
        assert!(status.is_connected());
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_disconnect_stops_everything() {
        let mut e = engine();
        e.set_desired(Some(key()));
        open(&mut e);

        e.disconnect();
        let fx = e.take_effects();
        for expected in [
            Effect::CancelReconnect,
            Effect::StopHeartbeat,
            Effect::StopPolling,
            Effect::CloseTransport { code: 1000 },
        ] {
            assert!(fx.contains(&expected), "missing {expected:?}");
        }
        let status = e.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(!status.polling);
        assert_eq!(status.current_subscription, None);
        assert_eq!(status.desired_subscription, Some(key()));
    }

    #[test]
    fn test_reconnect_resubscribes_once() {
        let mut e = engine();
        e.set_desired(Some(key()));
        open(&mut e);
        e.on_transport_event(
            text(r#"{"type":"subscribed","symbol":"NIFTY","expiry":"1700000000"}"#),
            Instant::now(),
        );
        e.on_transport_event(
            TransportEvent::Closed {
                code: 1006,
                clean: false,
            },
            Instant::now(),
        );
        e.take_effects();

        e.on_reconnect_due();
        e.on_transport_event(TransportEvent::Opened, Instant::now());
        assert_eq!(sent(&e.take_effects()), vec![ClientMessage::subscribe(&key())]);
    }
}
