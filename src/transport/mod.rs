//! Socket transport seam.
//!
//! A [`Transport`] opens a [`TransportLink`]: a pair of channels to a task that owns
//! the actual socket. Every link ends with exactly one terminal event
//! (`Closed` or `Error`) unless the worker closed it first.

pub mod ws;

use tokio::sync::mpsc;

use crate::protocol::Frame;

pub use ws::WsTransport;

pub const NORMAL_CLOSURE: u16 = 1000;
/// No close frame was received.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close frame without a status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(Frame),
    Closed { code: u16, clean: bool },
    Error(String),
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    Close(u16),
}

/// Worker side of an open socket.
#[derive(Debug)]
pub struct TransportLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Socket side of a link, held by the task (or test double) driving the socket.
#[derive(Debug)]
pub struct TransportPeer {
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportPeer {
    /// Push an event to the worker. False once the worker dropped the link.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.inbound.send(event).is_ok()
    }
}

impl TransportLink {
    pub fn pair() -> (TransportLink, TransportPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            TransportLink {
                outbound: out_tx,
                inbound: in_rx,
            },
            TransportPeer {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }

    /// Queue a frame. False if the socket task is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.outbound.send(Outbound::Frame(frame)).is_ok()
    }

    /// Request a close and give up the link.
    pub fn close(self, code: u16) {
        let _ = self.outbound.send(Outbound::Close(code));
    }

    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }
}

/// Opens links to a socket endpoint. Must be called from within a tokio runtime.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &str) -> TransportLink;
}
