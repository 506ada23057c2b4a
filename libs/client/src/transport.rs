//! Gateway socket with automatic reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use teamboard_common::protocol::{event, ClientFrame, ServerFrame, SessionReady};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ClientError, ClientResult};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: ClientFrame) -> ClientResult<()>;
    fn is_connected(&self) -> bool;
}

/// What the socket loop reports to its owner.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Frame(ServerFrame),
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// e.g. `ws://localhost:4010/gateway`
    pub url: String,
    pub token: String,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Used until the server announces its own interval.
    pub heartbeat_interval: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    /// Delay before reconnect attempt `attempt` (zero-based), doubling up to
    /// `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(self.max_backoff)
    }
}

const OUTBOUND_CAPACITY: usize = 64;

pub struct WsTransport {
    outbound: Mutex<Option<mpsc::Sender<ClientFrame>>>,
    connected: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl WsTransport {
    /// Start the socket loop. Frames arrive on the returned receiver; a
    /// `session:ready` frame marks every (re)connect.
    pub fn spawn(config: TransportConfig) -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (shutdown, _) = watch::channel(false);
        let transport = Arc::new(Self {
            outbound: Mutex::new(None),
            connected: AtomicBool::new(false),
            shutdown,
        });
        tokio::spawn(run(transport.clone(), config, events_tx));
        (transport, events_rx)
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn attach(&self, sender: mpsc::Sender<ClientFrame>) {
        *self.outbound.lock() = Some(sender);
        self.connected.store(true, Ordering::SeqCst);
    }

    fn detach(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.outbound.lock().take();
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, frame: ClientFrame) -> ClientResult<()> {
        let sender = self
            .outbound
            .lock()
            .clone()
            .ok_or(ClientError::NotConnected)?;
        sender.send(frame).await.map_err(|_| ClientError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn run(
    transport: Arc<WsTransport>,
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
) {
    let mut shutdown = transport.shutdown.subscribe();
    let mut attempt = 0u32;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match connect_and_pump(&transport, &config, &events, &mut shutdown).await {
            Ok(()) => attempt = 0,
            Err(e) => {
                tracing::warn!(error = %e, attempt, "gateway connection failed");
                attempt = attempt.saturating_add(1);
            }
        }
        transport.detach();
        if events.send(TransportEvent::Disconnected).await.is_err() || *shutdown.borrow() {
            break;
        }

        let delay = config.backoff(attempt);
        tracing::info!(?delay, attempt, "reconnecting to gateway");
        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    tracing::info!("gateway transport stopped");
}

/// One connection's lifetime. `Ok` means the session ended normally and the
/// next attempt starts without backoff growth.
async fn connect_and_pump(
    transport: &WsTransport,
    config: &TransportConfig,
    events: &mpsc::Sender<TransportEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> ClientResult<()> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::Socket(Box::new(e)))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
        .map_err(|e| ClientError::Socket(Box::new(e.into())))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (stream, _) = connect_async(request)
        .await
        .map_err(|e| ClientError::Socket(Box::new(e)))?;
    let (mut ws_tx, mut ws_rx) = stream.split();

    let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(OUTBOUND_CAPACITY);
    let mut heartbeat_every = config.heartbeat_interval;
    let mut next_heartbeat = Instant::now() + heartbeat_every;
    let mut ready = false;

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(ClientError::Socket(Box::new(e))),
                };
                let frame: ServerFrame = match serde_json::from_str(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring undecodable frame");
                        continue;
                    }
                };

                if frame.t == event::SESSION_READY && !ready {
                    if let Ok(session) = serde_json::from_value::<SessionReady>(frame.d.clone()) {
                        heartbeat_every = Duration::from_millis(session.heartbeat_interval)
                            .max(Duration::from_millis(100));
                        tracing::info!(connection_id = %session.connection_id, "gateway session ready");
                    }
                    // Sends are only accepted once the server has a session.
                    transport.attach(out_tx.clone());
                    ready = true;
                    next_heartbeat = Instant::now() + heartbeat_every;
                }
                if events.send(TransportEvent::Frame(frame)).await.is_err() {
                    let _ = ws_tx.close().await;
                    return Ok(());
                }
            }

            Some(frame) = out_rx.recv() => {
                let json = serde_json::to_string(&frame)?;
                ws_tx
                    .send(Message::Text(json.into()))
                    .await
                    .map_err(|e| ClientError::Socket(Box::new(e)))?;
            }

            _ = time::sleep_until(next_heartbeat), if ready => {
                let beat = ClientFrame::new(event::HEARTBEAT, serde_json::json!({}));
                ws_tx
                    .send(Message::Text(serde_json::to_string(&beat)?.into()))
                    .await
                    .map_err(|e| ClientError::Socket(Box::new(e)))?;
                next_heartbeat = Instant::now() + heartbeat_every;
            }

            _ = shutdown.changed() => {
                let _ = ws_tx.close().await;
                return Ok(());
            }
        }
    }
}
