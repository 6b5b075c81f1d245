//! WebSocket session: lifecycle state machine, reconnect backoff, heartbeat.

pub mod backoff;
pub mod heartbeat;
pub mod supervisor;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use backoff::ReconnectPolicy;
pub use heartbeat::{ConnectionQuality, HeartbeatMonitor};
pub use supervisor::{ConnectionSupervisor, SessionEvent, TransitionReason};

/// Connection state machine states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket and no reconnect pending
    #[default]
    Disconnected,
    /// Socket open in progress
    Connecting,
    /// Socket open, frames flowing
    Connected,
    /// Socket lost, waiting for the backoff timer
    Reconnecting,
    /// Retry budget spent; needs an explicit connect
    Failed,
}

impl ConnectionState {
    /// Socket either open or being opened.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
