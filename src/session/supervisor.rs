//! Connection Supervisor
//!
//! Owns the socket lifecycle:
//! - `Disconnected --connect--> Connecting --open--> Connected`
//! - `Connected --clean close--> Disconnected`
//! - `Connecting|Connected --unclean close|error--> Reconnecting --timer--> Connecting`
//! - budget spent `--> Failed`, terminal until an explicit `connect()`
//!
//! Hosts the heartbeat monitor and routes decoded envelopes. Everything it wants done
//! is pushed as an [`Effect`]; everything it observed is queued as a [`SessionEvent`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::ReconnectPolicy;
use super::heartbeat::{ConnectionQuality, HeartbeatMonitor};
use super::ConnectionState;
use crate::config::SyncConfig;
use crate::effect::Effect;
use crate::error::SyncError;
use crate::metrics::SyncMetrics;
use crate::protocol::{codec, ClientMessage, Envelope, Frame};
use crate::subscription::SubscriptionKey;
use crate::transport::NORMAL_CLOSURE;

/// Reason for state transition (for logging)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    ConnectRequested,
    Opened,
    ServerClose,
    AbnormalClose,
    TransportError,
    ReconnectDue,
    RetriesExhausted,
    DisconnectRequested,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectRequested => write!(f, "connect_requested"),
            Self::Opened => write!(f, "opened"),
            Self::ServerClose => write!(f, "server_close"),
            Self::AbnormalClose => write!(f, "abnormal_close"),
            Self::TransportError => write!(f, "transport_error"),
            Self::ReconnectDue => write!(f, "reconnect_due"),
            Self::RetriesExhausted => write!(f, "retries_exhausted"),
            Self::DisconnectRequested => write!(f, "disconnect_requested"),
        }
    }
}

/// Things the rest of the engine reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    QualityChanged(ConnectionQuality),
    /// Server confirmed a subscription.
    Subscribed(SubscriptionKey),
    Unsubscribed,
    ErrorRaised(SyncError),
    ErrorCleared,
    /// Market data payload for the consumer.
    Data(Value),
}

#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    policy: ReconnectPolicy,
    heartbeat: HeartbeatMonitor,
    rng: StdRng,
    client_id: Option<String>,
    last_error: Option<SyncError>,
    events: VecDeque<SessionEvent>,
    metrics: Arc<SyncMetrics>,
}

impl ConnectionSupervisor {
    pub fn new(config: &SyncConfig, metrics: Arc<SyncMetrics>) -> Self {
        Self::with_rng(config, metrics, StdRng::from_entropy())
    }

    /// Deterministic jitter, for tests and replay.
    pub fn with_seed(config: &SyncConfig, metrics: Arc<SyncMetrics>, seed: u64) -> Self {
        Self::with_rng(config, metrics, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &SyncConfig, metrics: Arc<SyncMetrics>, rng: StdRng) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy: ReconnectPolicy::new(&config.reconnect),
            heartbeat: HeartbeatMonitor::new(&config.heartbeat),
            rng,
            client_id: None,
            last_error: None,
            events: VecDeque::new(),
            metrics,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn quality(&self) -> ConnectionQuality {
        self.heartbeat.quality()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn pop_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Open the socket. No-op while already connecting or connected.
    pub fn connect(&mut self, fx: &mut Vec<Effect>) {
        if self.state.is_live() {
            debug!(state = %self.state, "connect ignored, socket already live");
            return;
        }

        fx.push(Effect::CancelReconnect);
        self.policy.reset();
        self.clear_error();
        if let Some(q) = self.heartbeat.stop() {
            self.events.push_back(SessionEvent::QualityChanged(q));
        }

        self.metrics.record_connect_attempt();
        self.transition(ConnectionState::Connecting, TransitionReason::ConnectRequested);
        fx.push(Effect::OpenTransport);
    }

    /// Tear down on purpose. Nothing reconnects afterwards.
    pub fn disconnect(&mut self, fx: &mut Vec<Effect>) {
        fx.push(Effect::CancelReconnect);
        fx.push(Effect::StopHeartbeat);
        if self.state.is_live() {
            fx.push(Effect::CloseTransport {
                code: NORMAL_CLOSURE,
            });
        }

        self.policy.exhaust();
        self.client_id = None;
        if let Some(q) = self.heartbeat.force_disconnected() {
            self.events.push_back(SessionEvent::QualityChanged(q));
        }
        self.transition(
            ConnectionState::Disconnected,
            TransitionReason::DisconnectRequested,
        );
    }

    pub fn on_open(&mut self, now: Instant, fx: &mut Vec<Effect>) {
        if self.state != ConnectionState::Connecting {
            debug!(state = %self.state, "ignoring open for a socket we no longer want");
            return;
        }

        self.policy.reset();
        self.metrics.record_connect_success();
        self.clear_error();
        self.transition(ConnectionState::Connected, TransitionReason::Opened);

        if let Some(q) = self.heartbeat.start(now) {
            self.events.push_back(SessionEvent::QualityChanged(q));
        }
        fx.push(Effect::StartHeartbeat(self.heartbeat.interval()));
    }

    pub fn on_close(&mut self, code: u16, clean: bool, fx: &mut Vec<Effect>) {
        if !self.state.is_live() {
            debug!(code, state = %self.state, "ignoring close outside a live session");
            return;
        }

        if clean && code == NORMAL_CLOSURE {
            info!(code, "🔌 WebSocket closed normally");
            fx.push(Effect::StopHeartbeat);
            self.client_id = None;
            if let Some(q) = self.heartbeat.stop() {
                self.events.push_back(SessionEvent::QualityChanged(q));
            }
            self.transition(ConnectionState::Disconnected, TransitionReason::ServerClose);
            return;
        }

        warn!(code, clean, "⚠️ WebSocket closed abnormally");
        self.handle_failure(TransitionReason::AbnormalClose, fx);
    }

    /// Terminal error on the live socket. No close follows it.
    pub fn on_transport_error(&mut self, message: String, fx: &mut Vec<Effect>) {
        if !self.state.is_live() {
            debug!(error = %message, "ignoring transport error outside a live session");
            return;
        }

        warn!(error = %message, "❌ WebSocket error");
        self.raise(SyncError::Transport(message));
        self.handle_failure(TransitionReason::TransportError, fx);
    }

    pub fn on_reconnect_due(&mut self, fx: &mut Vec<Effect>) {
        if self.state != ConnectionState::Reconnecting {
            debug!(state = %self.state, "stale reconnect timer");
            return;
        }

        self.metrics.record_connect_attempt();
        self.transition(ConnectionState::Connecting, TransitionReason::ReconnectDue);
        fx.push(Effect::OpenTransport);
    }

    /// Heartbeat interval fired: ping and re-classify.
    pub fn on_heartbeat_due(&mut self, now: Instant, fx: &mut Vec<Effect>) {
        if self.state != ConnectionState::Connected {
            return;
        }

        fx.push(Effect::Send(ClientMessage::Ping));
        self.metrics.record_ping();
        if let Some(q) = self.heartbeat.tick(now) {
            debug!(quality = %q, "connection quality changed");
            self.events.push_back(SessionEvent::QualityChanged(q));
        }
    }

    /// Decode and route one inbound frame.
    ///
    /// An undecodable frame is counted and returned as [`SyncError::Decode`]; it never
    /// becomes `last_error` and the session stays as it was.
    pub fn on_frame(&mut self, frame: &Frame, now: Instant) -> Result<(), SyncError> {
        if self.state != ConnectionState::Connected {
            debug!(bytes = frame.len(), state = %self.state, "dropping frame outside connected state");
            return Ok(());
        }
        self.metrics.record_frame();

        match codec::decode(frame) {
            Ok(envelope) => {
                self.route(envelope, now);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_decode_error();
                Err(SyncError::from(e))
            }
        }
    }

    fn route(&mut self, envelope: Envelope, now: Instant) {
        match envelope {
            Envelope::Connected { client_id } => {
                info!(client_id = ?client_id, "🔌 Server acknowledged connection");
                self.client_id = client_id;
            }
            Envelope::Subscribed { symbol, selector } => {
                self.events
                    .push_back(SessionEvent::Subscribed(SubscriptionKey::new(symbol, selector)));
            }
            Envelope::Unsubscribed => {
                self.events.push_back(SessionEvent::Unsubscribed);
            }
            Envelope::Pong => {
                if let Some(q) = self.heartbeat.on_pong(now) {
                    self.events.push_back(SessionEvent::QualityChanged(q));
                }
            }
            Envelope::Error { message } => {
                self.metrics.record_protocol_error();
                warn!(error = %message, "server reported error");
                self.raise(SyncError::Protocol(message));
            }
            Envelope::Data(payload) => {
                self.events.push_back(SessionEvent::Data(payload));
            }
        }
    }

    pub fn clear_error(&mut self) {
        if self.last_error.take().is_some() {
            self.events.push_back(SessionEvent::ErrorCleared);
        }
    }

    fn raise(&mut self, err: SyncError) {
        self.last_error = Some(err.clone());
        self.events.push_back(SessionEvent::ErrorRaised(err));
    }

    fn handle_failure(&mut self, reason: TransitionReason, fx: &mut Vec<Effect>) {
        fx.push(Effect::StopHeartbeat);
        self.client_id = None;

        if self.policy.would_exhaust() {
            let attempts = self.policy.max_attempts();
            self.policy.exhaust();
            self.metrics.record_retries_exhausted();
            warn!(attempts, "🛑 Max reconnection attempts reached");

            if let Some(q) = self.heartbeat.force_disconnected() {
                self.events.push_back(SessionEvent::QualityChanged(q));
            }
            self.transition(ConnectionState::Failed, TransitionReason::RetriesExhausted);
            self.raise(SyncError::ExhaustedRetries { attempts });
            return;
        }

        if let Some(q) = self.heartbeat.stop() {
            self.events.push_back(SessionEvent::QualityChanged(q));
        }

        let delay = self.policy.next_delay(&mut self.rng);
        info!(
            attempt = self.policy.attempt() + 1,
            max_attempts = self.policy.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "🔄 Scheduling reconnect"
        );
        fx.push(Effect::ScheduleReconnect(delay));
        self.policy.advance();
        self.metrics.record_reconnect_scheduled();
        self.transition(ConnectionState::Reconnecting, reason);
    }

    fn transition(&mut self, to: ConnectionState, reason: TransitionReason) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;

        info!(from = %from, to = %to, reason = %reason, "session_transition");
        self.events
            .push_back(SessionEvent::StateChanged { from, to });
    }
}
