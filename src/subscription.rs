//! Subscription Coordinator
//!
//! Maps the consumer's instrument of interest to subscribe / unsubscribe frames.
//! - At most one subscription is live on the server at a time
//! - Re-requesting the live (or in-flight) key sends nothing
//! - An unsubscribe is always flushed before the next subscribe
//! - `current` is only set once the server confirms with `subscribed`

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::effect::Effect;
use crate::protocol::ClientMessage;

/// (symbol, expiry-or-interval) pair identifying one live feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub symbol: String,
    pub selector: String,
}

impl SubscriptionKey {
    pub fn new(symbol: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            selector: selector.into(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.selector)
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionCoordinator {
    desired: Option<SubscriptionKey>,
    /// Confirmed by the server.
    current: Option<SubscriptionKey>,
    /// Subscribe sent, confirmation pending. Never set together with `current`.
    in_flight: Option<SubscriptionKey>,
}

impl SubscriptionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn desired(&self) -> Option<&SubscriptionKey> {
        self.desired.as_ref()
    }

    pub fn current(&self) -> Option<&SubscriptionKey> {
        self.current.as_ref()
    }

    pub fn in_flight(&self) -> Option<&SubscriptionKey> {
        self.in_flight.as_ref()
    }

    /// True when the confirmed subscription is exactly what the consumer wants.
    pub fn is_synced(&self) -> bool {
        self.current == self.desired
    }

    /// Whatever the server may currently be streaming to us.
    fn server_side(&self) -> Option<&SubscriptionKey> {
        self.in_flight.as_ref().or(self.current.as_ref())
    }

    /// Record the instrument of interest and reconcile.
    pub fn set_desired(
        &mut self,
        key: Option<SubscriptionKey>,
        connected: bool,
        fx: &mut Vec<Effect>,
    ) {
        if self.desired != key {
            debug!(
                from = ?self.desired,
                to = ?key,
                "desired subscription changed"
            );
        }
        self.desired = key;
        self.reconcile(connected, fx);
    }

    /// Bring the server-side subscription in line with `desired`.
    pub fn reconcile(&mut self, connected: bool, fx: &mut Vec<Effect>) {
        if self.server_side() == self.desired.as_ref() {
            return;
        }

        if let Some(stale) = self.server_side() {
            if connected {
                info!(subscription = %stale, "📴 Unsubscribing");
                fx.push(Effect::Send(ClientMessage::Unsubscribe));
            }
            self.current = None;
            self.in_flight = None;
        }

        let Some(desired) = self.desired.clone() else {
            return;
        };

        if !connected {
            debug!(subscription = %desired, "not connected, deferring subscribe");
            return;
        }

        info!(subscription = %desired, "📡 Subscribing");
        fx.push(Effect::Send(ClientMessage::subscribe(&desired)));
        self.in_flight = Some(desired);
    }

    /// Server confirmed a subscription. Returns true if it promoted the in-flight key.
    pub fn on_subscribed(&mut self, key: &SubscriptionKey) -> bool {
        if self.in_flight.as_ref() == Some(key) {
            self.current = self.in_flight.take();
            info!(subscription = %key, "✅ Subscription confirmed");
            return true;
        }
        if self.current.as_ref() != Some(key) {
            debug!(subscription = %key, "ignoring confirmation for a subscription we no longer want");
        }
        false
    }

    /// Server dropped our subscription.
    pub fn on_unsubscribed(&mut self) {
        if let Some(key) = self.current.take() {
            debug!(subscription = %key, "server reported unsubscribed");
        }
    }

    /// The socket went away; the server forgets its subscriptions with it.
    pub fn on_connection_lost(&mut self) {
        self.current = None;
        self.in_flight = None;
    }
}
