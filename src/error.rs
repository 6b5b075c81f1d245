//! Error taxonomy for the sync core.
//!
//! Decode and poll errors are recovered where they happen (logged + counted).
//! Transport, protocol and exhaustion errors are surfaced through `last_error`
//! while the session keeps recovering on its own.

use thiserror::Error;

/// A frame that could not be turned into an [`Envelope`](crate::Envelope).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid JSON text frame: {0}")]
    Json(String),

    #[error("invalid MessagePack binary frame: {0}")]
    MessagePack(String),

    #[error("malformed `{kind}` message: {reason}")]
    Malformed { kind: String, reason: String },
}

/// Failure to serialize an outbound client message.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("JSON encode failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode failed: {0}")]
    MessagePack(#[from] rmp_serde::encode::Error),
}

/// Errors observable by the application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Malformed inbound frame, returned by the supervisor's `on_frame`.
    /// Logged and dropped, never surfaced as `last_error`.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Socket-level failure; a reconnect is scheduled.
    #[error("transport error: {0}")]
    Transport(String),

    /// Server-sent `error` envelope. Connection state is untouched.
    #[error("{0}")]
    Protocol(String),

    /// Reconnect budget spent. Terminal until an explicit `connect()`.
    #[error("Max reconnection attempts reached")]
    ExhaustedRetries { attempts: u32 },

    /// One failed fallback fetch, reported to the poller. Retried on the next interval.
    #[error("poll failed: {0}")]
    Poll(String),

    /// Rejected configuration. `SyncClient::spawn` returns it under an `anyhow` context
    /// and no worker is started.
    #[error("config error: {0}")]
    Config(String),
}

impl From<crate::config::ConfigError> for SyncError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl SyncError {
    /// Errors that keep the fallback poller armed until cleared.
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Protocol(_) | Self::ExhaustedRetries { .. }
        )
    }
}
