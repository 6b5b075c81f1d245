//! Sync facade: the only type the application holds.
//!
//! All engine state lives in one worker task. The facade sends commands over an
//! unbounded channel and reads a `watch` snapshot, so none of its methods block,
//! fail or panic.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::engine::{SyncEngine, SyncStatus};
use crate::config::SyncConfig;
use crate::effect::Effect;
use crate::error::SyncError;
use crate::metrics::SyncMetrics;
use crate::poller::{RestSnapshotFetcher, SnapshotFetcher};
use crate::protocol::{codec, WireFormat};
use crate::session::{ConnectionQuality, ConnectionState};
use crate::subscription::SubscriptionKey;
use crate::transport::{Transport, TransportEvent, TransportLink, WsTransport, ABNORMAL_CLOSURE};

type DataCallback = Box<dyn Fn(Value) + Send + Sync>;

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    SetDesired(Option<SubscriptionKey>),
    Shutdown,
}

#[derive(Debug)]
struct FetchOutcome {
    generation: u64,
    key: SubscriptionKey,
    result: Result<Value, SyncError>,
}

pub struct SyncClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<SyncStatus>,
    callback: Arc<RwLock<Option<DataCallback>>>,
    metrics: Arc<SyncMetrics>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("status", &*self.status_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl SyncClient {
    /// Start a client against the configured WebSocket and REST endpoints.
    ///
    /// Must be called from within a tokio runtime. Nothing connects until [`connect`](Self::connect).
    pub fn spawn(config: SyncConfig) -> Result<Self> {
        config
            .validate()
            .map_err(SyncError::from)
            .context("invalid sync config")?;
        let fetcher = RestSnapshotFetcher::from_config(&config)?;
        let transport = WsTransport::new(config.connect_timeout());
        Ok(Self::spawn_with(config, transport, fetcher))
    }

    /// Start a client over caller-provided transport and fetcher.
    pub fn spawn_with<T, F>(config: SyncConfig, transport: T, fetcher: F) -> Self
    where
        T: Transport,
        F: SnapshotFetcher + 'static,
    {
        let metrics = Arc::new(SyncMetrics::new());
        let engine = SyncEngine::new(&config, metrics.clone());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(engine.status());
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let callback: Arc<RwLock<Option<DataCallback>>> = Arc::new(RwLock::new(None));

        let worker = Worker {
            engine,
            ws_url: config.ws_url.clone(),
            wire_format: config.wire_format,
            transport: Arc::new(transport),
            fetcher: Arc::new(fetcher),
            link: None,
            reconnect_at: None,
            heartbeat: None,
            poll: None,
            fetch_tx,
            fetch_rx,
            status_tx,
            callback: callback.clone(),
        };
        let handle = tokio::spawn(worker.run(cmd_rx));

        info!(feed = %config.feed, url = %config.ws_url, "🚀 Sync client started");

        Self {
            cmd_tx,
            status_rx,
            callback,
            metrics,
            worker: Mutex::new(Some(handle)),
        }
    }

    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Make `(symbol, selector)` the instrument of interest.
    pub fn subscribe(&self, symbol: impl Into<String>, selector: impl Into<String>) {
        self.command(Command::SetDesired(Some(SubscriptionKey::new(symbol, selector))));
    }

    pub fn unsubscribe(&self) {
        self.command(Command::SetDesired(None));
    }

    /// Set callback for data payloads, from the stream or the REST fallback.
    ///
    /// Runs on the worker task; it must not call back into `set_callback`.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        *self.callback.write() = Some(Box::new(callback));
    }

    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    pub fn connection_quality(&self) -> ConnectionQuality {
        self.status_rx.borrow().quality
    }

    pub fn current_subscription(&self) -> Option<SubscriptionKey> {
        self.status_rx.borrow().current_subscription.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.status_rx.borrow().last_error.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver that changes whenever the published status does.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    pub fn metrics(&self) -> Arc<SyncMetrics> {
        self.metrics.clone()
    }

    /// Disconnect and wait for the worker to finish.
    pub async fn shutdown(&self) {
        self.command(Command::Shutdown);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "sync worker ended abnormally");
            }
        }
    }

    fn command(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            debug!("sync worker already stopped");
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

struct Worker {
    engine: SyncEngine,
    ws_url: String,
    wire_format: WireFormat,
    transport: Arc<dyn Transport>,
    fetcher: Arc<dyn SnapshotFetcher>,
    link: Option<TransportLink>,
    reconnect_at: Option<Instant>,
    heartbeat: Option<Interval>,
    poll: Option<Interval>,
    fetch_tx: mpsc::UnboundedSender<FetchOutcome>,
    fetch_rx: mpsc::UnboundedReceiver<FetchOutcome>,
    status_tx: watch::Sender<SyncStatus>,
    callback: Arc<RwLock<Option<DataCallback>>>,
}

impl Worker {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Connect) => self.engine.connect(),
                        Some(Command::Disconnect) => self.engine.disconnect(),
                        Some(Command::SetDesired(key)) => self.engine.set_desired(key),
                        Some(Command::Shutdown) | None => {
                            self.engine.disconnect();
                            self.execute();
                            self.publish();
                            break;
                        }
                    }
                }
                event = next_event(&mut self.link) => {
                    let event = event.unwrap_or(TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        clean: false,
                    });
                    if event.is_terminal() {
                        self.link = None;
                    }
                    self.engine.on_transport_event(event, Instant::now());
                }
                _ = deadline(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.engine.on_reconnect_due();
                }
                _ = tick(&mut self.heartbeat) => {
                    self.engine.on_heartbeat_due(Instant::now());
                }
                _ = tick(&mut self.poll) => {
                    self.engine.on_poll_tick();
                }
                Some(outcome) = self.fetch_rx.recv() => {
                    self.engine.on_poll_result(outcome.generation, &outcome.key, outcome.result);
                }
            }

            self.execute();
            self.publish();
        }

        info!("🛑 Sync worker stopped");
    }

    fn execute(&mut self) {
        for effect in self.engine.take_effects() {
            match effect {
                Effect::OpenTransport => {
                    self.link = Some(self.transport.open(&self.ws_url));
                }
                Effect::CloseTransport { code } => {
                    if let Some(link) = self.link.take() {
                        link.close(code);
                    }
                }
                Effect::Send(msg) => {
                    let Some(link) = self.link.as_ref() else {
                        debug!(?msg, "no live transport, dropping message");
                        continue;
                    };
                    match codec::encode(&msg, self.wire_format) {
                        Ok(frame) => {
                            if !link.send(frame) {
                                debug!(?msg, "transport task gone, message dropped");
                            }
                        }
                        Err(e) => warn!(error = %e, ?msg, "failed to encode client message"),
                    }
                }
                Effect::ScheduleReconnect(delay) => {
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                Effect::CancelReconnect => self.reconnect_at = None,
                Effect::StartHeartbeat(period) => {
                    let mut hb = interval_at(Instant::now() + period, period);
                    hb.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.heartbeat = Some(hb);
                }
                Effect::StopHeartbeat => self.heartbeat = None,
                Effect::StartPolling(period) => {
                    let mut poll = interval(period);
                    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.poll = Some(poll);
                }
                Effect::StopPolling => self.poll = None,
                Effect::Fetch { key, generation } => {
                    let fetcher = self.fetcher.clone();
                    let tx = self.fetch_tx.clone();
                    tokio::spawn(async move {
                        let result = fetcher
                            .fetch(&key)
                            .await
                            .map_err(|e| SyncError::Poll(format!("{e:#}")));
                        let _ = tx.send(FetchOutcome {
                            generation,
                            key,
                            result,
                        });
                    });
                }
                Effect::Deliver(payload) => {
                    if let Some(callback) = self.callback.read().as_ref() {
                        callback(payload);
                    }
                }
            }
        }
    }

    fn publish(&self) {
        let next = self.engine.status();
        self.status_tx.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
    }
}

async fn next_event(link: &mut Option<TransportLink>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
