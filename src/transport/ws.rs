//! tokio-tungstenite transport.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::{
    Outbound, Transport, TransportEvent, TransportLink, TransportPeer, ABNORMAL_CLOSURE,
    NO_STATUS_RECEIVED,
};
use crate::protocol::Frame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str) -> TransportLink {
        let (link, peer) = TransportLink::pair();
        tokio::spawn(run_socket(url.to_string(), self.connect_timeout, peer));
        link
    }
}

async fn connect(url: &str, timeout: Duration) -> Result<WsStream> {
    let (stream, resp) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .context("WebSocket connect timed out")?
        .context("WebSocket connect failed")?;
    info!("✅ WebSocket connected (status={})", resp.status());
    Ok(stream)
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
    }
}

async fn run_socket(url: String, timeout: Duration, mut peer: TransportPeer) {
    info!(url = %url, "🔌 Connecting WebSocket");
    let stream = match connect(&url, timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            peer.emit(TransportEvent::Error(format!("{e:#}")));
            return;
        }
    };

    if !peer.emit(TransportEvent::Opened) {
        debug!("link dropped before open, closing socket");
    }
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            out = peer.outbound.recv() => {
                match out {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = write.send(to_message(frame)).await {
                            peer.emit(TransportEvent::Error(format!("send failed: {e}")));
                            return;
                        }
                    }
                    Some(Outbound::Close(code)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: "".into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        let _ = write.close().await;
                        debug!(code, "socket closed by client");
                        return;
                    }
                    None => {
                        // Worker dropped the link without a close request
                        let _ = write.close().await;
                        return;
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        peer.emit(TransportEvent::Frame(Frame::Text(text)));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        peer.emit(TransportEvent::Frame(Frame::Binary(bytes)));
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "server close");
                        let code = frame
                            .map(|f| u16::from(f.code))
                            .unwrap_or(NO_STATUS_RECEIVED);
                        peer.emit(TransportEvent::Closed { code, clean: true });
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        peer.emit(TransportEvent::Error(format!("ws error: {e}")));
                        return;
                    }
                    None => {
                        peer.emit(TransportEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            clean: false,
                        });
                        return;
                    }
                }
            }
        }
    }
}
