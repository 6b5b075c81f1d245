//! Side effects requested by the synchronous core.
//!
//! Components never touch sockets, timers or HTTP themselves. They push [`Effect`]s
//! and the worker in [`crate::sync::client`] executes them in order.

use std::time::Duration;

use serde_json::Value;

use crate::protocol::ClientMessage;
use crate::subscription::SubscriptionKey;

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a new transport to the configured endpoint.
    OpenTransport,
    /// Close the live transport with the given close code.
    CloseTransport { code: u16 },
    /// Send a client message over the live transport.
    Send(ClientMessage),
    /// Arm the reconnect timer.
    ScheduleReconnect(Duration),
    CancelReconnect,
    /// Arm the heartbeat interval (first tick one period from now).
    StartHeartbeat(Duration),
    StopHeartbeat,
    /// Arm the poll interval (first tick immediately).
    StartPolling(Duration),
    StopPolling,
    /// Run one fallback fetch; the result must be reported with the same generation.
    Fetch {
        key: SubscriptionKey,
        generation: u64,
    },
    /// Hand a payload to the consumer callback.
    Deliver(Value),
}
