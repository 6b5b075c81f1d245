//! End-to-end behaviour of `SyncClient` over a channel-backed transport and paused time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use feedsync::transport::{Outbound, TransportPeer};
use feedsync::{
    ConnectionQuality, ConnectionState, Frame, SnapshotFetcher, SubscriptionKey, SyncClient,
    SyncConfig, SyncStatus, Transport, TransportEvent, TransportLink, WireFormat,
};

const GUARD: Duration = Duration::from_secs(120);

struct MockTransport(mpsc::UnboundedSender<TransportPeer>);

impl Transport for MockTransport {
    fn open(&self, _url: &str) -> TransportLink {
        let (link, peer) = TransportLink::pair();
        let _ = self.0.send(peer);
        link
    }
}

#[derive(Clone, Default)]
struct MockFetcher {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SnapshotFetcher for MockFetcher {
    async fn fetch(&self, key: &SubscriptionKey) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"source": "rest", "symbol": key.symbol, "selector": key.selector}))
    }
}

struct Harness {
    client: SyncClient,
    peers: mpsc::UnboundedReceiver<TransportPeer>,
    data: mpsc::UnboundedReceiver<Value>,
    fetcher: MockFetcher,
}

fn harness(config: SyncConfig) -> Harness {
    let (peer_tx, peers) = mpsc::unbounded_channel();
    let fetcher = MockFetcher::default();
    let client = SyncClient::spawn_with(config, MockTransport(peer_tx), fetcher.clone());

    let (data_tx, data) = mpsc::unbounded_channel();
    client.set_callback(move |payload| {
        let _ = data_tx.send(payload);
    });

    Harness {
        client,
        peers,
        data,
        fetcher,
    }
}

impl Harness {
    async fn next_peer(&mut self) -> TransportPeer {
        timeout(GUARD, self.peers.recv())
            .await
            .expect("transport opened")
            .expect("transport channel open")
    }

    async fn wait_status(&self, pred: impl FnMut(&SyncStatus) -> bool) -> SyncStatus {
        let mut rx = self.client.watch_status();
        let status = timeout(GUARD, rx.wait_for(pred))
            .await
            .expect("status reached")
            .expect("worker alive")
            .clone();
        status
    }

    async fn next_data(&mut self) -> Value {
        timeout(GUARD, self.data.recv())
            .await
            .expect("payload delivered")
            .expect("callback alive")
    }

    async fn open(&mut self) -> TransportPeer {
        self.client.connect();
        let peer = self.next_peer().await;
        peer.emit(TransportEvent::Opened);
        self.wait_status(|s| s.is_connected()).await;
        peer
    }
}

fn text(value: Value) -> TransportEvent {
    TransportEvent::Frame(Frame::Text(value.to_string()))
}

/// Next non-ping message the client sent.
async fn next_sent(peer: &mut TransportPeer) -> Value {
    loop {
        let out = timeout(GUARD, peer.outbound.recv())
            .await
            .expect("client sent something");
        let value = match out {
            Some(Outbound::Frame(Frame::Text(t))) => serde_json::from_str::<Value>(&t).unwrap(),
            Some(Outbound::Frame(Frame::Binary(b))) => rmp_serde::from_slice::<Value>(&b).unwrap(),
            other => panic!("unexpected outbound: {other:?}"),
        };
        if value["type"] != "ping" {
            return value;
        }
    }
}

/// Everything queued so far, pings excluded.
fn drain_sent(peer: &mut TransportPeer) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(item) = peer.outbound.try_recv() {
        if item != Outbound::Frame(Frame::Text(r#"{"type":"ping"}"#.into())) {
            out.push(item);
        }
    }
    out
}

#[tokio::test(start_paused = true)]
async fn connected_ack_marks_connected_without_data() {
    let mut h = harness(SyncConfig::default());
    let peer = h.open().await;

    peer.emit(text(json!({"type": "connected", "client_id": "abc"})));
    let status = h.wait_status(|s| s.client_id.is_some()).await;

    assert!(h.client.is_connected());
    assert_eq!(status.client_id.as_deref(), Some("abc"));
    assert!(h.data.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn subscribe_while_disconnected_sends_once_connected() {
    let mut h = harness(SyncConfig::default());
    h.client.subscribe("NIFTY", "1700000000");
    tokio::task::yield_now().await;
    assert!(h.peers.try_recv().is_err());

    let mut peer = h.open().await;
    assert_eq!(
        next_sent(&mut peer).await,
        json!({"type": "subscribe", "sid": "NIFTY", "exp_sid": "1700000000"})
    );

    // Repeating the request is a no-op on the wire
    h.client.subscribe("NIFTY", "1700000000");
    peer.emit(text(json!({"type": "subscribed", "symbol": "NIFTY", "expiry": "1700000000"})));
    h.wait_status(|s| s.current_subscription.is_some()).await;
    assert!(drain_sent(&mut peer).is_empty());
    assert_eq!(
        h.client.current_subscription(),
        Some(SubscriptionKey::new("NIFTY", "1700000000"))
    );
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects_after_jittered_delay() {
    let mut h = harness(SyncConfig::default());
    let peer = h.open().await;

    let closed_at = Instant::now();
    peer.emit(TransportEvent::Closed {
        code: 1006,
        clean: false,
    });
    h.wait_status(|s| s.state == ConnectionState::Reconnecting).await;

    let _next = h.next_peer().await;
    let waited = closed_at.elapsed();
    assert!(
        waited >= Duration::from_millis(1_000) && waited < Duration::from_millis(2_000),
        "reconnected after {waited:?}"
    );
    assert_eq!(h.client.connection_state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn ten_unclean_closes_fail_and_fall_back_to_polling() {
    let mut h = harness(SyncConfig::default());
    h.client.subscribe("NIFTY", "1700000000");
    h.client.connect();

    for _ in 0..10 {
        let peer = h.next_peer().await;
        peer.emit(TransportEvent::Closed {
            code: 1006,
            clean: false,
        });
    }

    let status = h.wait_status(|s| s.state == ConnectionState::Failed).await;
    assert_eq!(
        status.last_error.as_deref(),
        Some("Max reconnection attempts reached")
    );
    assert_eq!(status.quality, ConnectionQuality::Disconnected);
    assert!(status.polling);

    // Drain whatever polled during the retries, then expect more
    while h.data.try_recv().is_ok() {}
    let payload = h.next_data().await;
    assert_eq!(payload["source"], "rest");

    // No further reconnects without an explicit connect
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(h.peers.try_recv().is_err());
    assert_eq!(h.client.metrics().snapshot().retries_exhausted, 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_binary_frame_is_skipped() {
    let mut h = harness(SyncConfig::default());
    let peer = h.open().await;

    peer.emit(TransportEvent::Frame(Frame::Binary(vec![0xc1, 0xff])));
    peer.emit(text(json!({"symbol": "NIFTY", "ltp": 22450.5})));

    assert_eq!(h.next_data().await, json!({"symbol": "NIFTY", "ltp": 22450.5}));
    assert!(h.client.is_connected());
    assert_eq!(h.client.last_error(), None);
    assert_eq!(h.client.metrics().snapshot().decode_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn polling_stops_once_subscription_confirmed() {
    let mut h = harness(SyncConfig::default());
    h.client.subscribe("NIFTY", "1700000000");
    let peer = h.open().await;

    // Unconfirmed subscription: REST fills in
    let payload = h.next_data().await;
    assert_eq!(payload["source"], "rest");

    peer.emit(text(json!({"type": "subscribed", "symbol": "NIFTY", "expiry": 1700000000})));
    h.wait_status(|s| !s.polling).await;
    tokio::task::yield_now().await;
    while h.data.try_recv().is_ok() {}

    let calls = h.fetcher.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), calls);
    assert!(h.data.try_recv().is_err());

    // Stream data still flows
    peer.emit(text(json!({"symbol": "NIFTY", "ltp": 1.0})));
    assert_eq!(h.next_data().await, json!({"symbol": "NIFTY", "ltp": 1.0}));
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_normally_and_stays_down() {
    let mut h = harness(SyncConfig::default());
    h.client.subscribe("NIFTY", "1700000000");
    let mut peer = h.open().await;
    next_sent(&mut peer).await;

    h.client.disconnect();
    h.wait_status(|s| s.state == ConnectionState::Disconnected).await;

    let close = timeout(GUARD, peer.outbound.recv()).await.expect("close sent");
    assert_eq!(close, Some(Outbound::Close(1000)));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(h.peers.try_recv().is_err());
    let status = h.client.status();
    assert!(!status.polling);
    assert_eq!(status.quality, ConnectionQuality::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn messagepack_wire_format_sends_binary_frames() {
    let config = SyncConfig {
        wire_format: WireFormat::MessagePack,
        ..SyncConfig::default()
    };
    let mut h = harness(config);
    h.client.subscribe("BANKNIFTY", "5m");
    let mut peer = h.open().await;

    let out = timeout(GUARD, peer.outbound.recv()).await.unwrap().unwrap();
    let Outbound::Frame(Frame::Binary(bytes)) = out else {
        panic!("expected binary frame, got {out:?}");
    };
    let value: Value = rmp_serde::from_slice(&bytes).unwrap();
    assert_eq!(
        value,
        json!({"type": "subscribe", "sid": "BANKNIFTY", "exp_sid": "5m"})
    );
}

#[tokio::test(start_paused = true)]
async fn server_error_surfaces_without_dropping_connection() {
    let mut h = harness(SyncConfig::default());
    let peer = h.open().await;

    peer.emit(text(json!({"type": "error"})));
    let status = h.wait_status(|s| s.last_error.is_some()).await;
    assert_eq!(status.last_error.as_deref(), Some("Unknown error"));
    assert_eq!(status.state, ConnectionState::Connected);
}
