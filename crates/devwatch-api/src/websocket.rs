//! STOMP-over-WebSocket client for the device update broker.
//!
//! Owns at most one physical connection. [`StompClient::connect`] performs
//! the WebSocket upgrade plus the STOMP `CONNECT`/`CONNECTED` handshake and
//! then hands the socket to two background tasks: a reader that fans
//! `MESSAGE` frames out through a [`tokio::sync::broadcast`] channel, and a
//! writer that serializes outbound frames and heartbeats.
//!
//! The client never reconnects on its own. When the socket drops,
//! [`is_connected`](StompClient::is_connected) turns false and the caller
//! decides whether to call `connect` again.
//!
//! # Example
//!
//! ```rust,ignore
//! use devwatch_api::websocket::{StompClient, StompConfig};
//!
//! let client = StompClient::new(StompConfig::default());
//! let mut rx = client.messages();
//! client.connect().await?;
//! let sub = client.subscribe("/topic/device-updates")?;
//!
//! while let Ok(msg) = rx.recv().await {
//!     println!("{}: {}", msg.destination.as_deref().unwrap_or("?"), msg.body);
//! }
//!
//! client.unsubscribe(&sub)?;
//! client.disconnect();
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::stomp::{self, Command, Frame};

// ── Broadcast channel capacity ───────────────────────────────────────

const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// Raw WebSocket path of the backend's SockJS STOMP endpoint.
pub const DEFAULT_BROKER_PATH: &str = "/socket/websocket";

/// Broker endpoint of a locally running backend.
pub const DEFAULT_BROKER_URL: &str = "ws://localhost:8080/socket/websocket";

// ── Configuration ────────────────────────────────────────────────────

/// Connection settings for the update broker.
#[derive(Debug, Clone)]
pub struct StompConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8080/socket/websocket`.
    pub url: Url,
    /// Value of the STOMP `host` header. Defaults to the URL host.
    pub virtual_host: Option<String>,
    /// Upper bound on upgrade + `CONNECTED` handshake. Default: 10s.
    pub connect_timeout: Duration,
    /// Outgoing heartbeat we offer, in milliseconds. 0 disables.
    pub heartbeat_ms: u64,
}

impl Default for StompConfig {
    fn default() -> Self {
        Self {
            url: Url::parse(DEFAULT_BROKER_URL).unwrap_or_else(|_| unreachable!("static URL")),
            virtual_host: None,
            connect_timeout: Duration::from_secs(10),
            heartbeat_ms: 10_000,
        }
    }
}

// ── Public message types ─────────────────────────────────────────────

/// A `MESSAGE` frame delivered by the broker.
#[derive(Debug, Clone)]
pub struct StompMessage {
    /// Subscription id the broker matched this message against.
    pub subscription: Option<String>,
    pub destination: Option<String>,
    pub message_id: Option<String>,
    pub body: String,
}

impl From<Frame> for StompMessage {
    fn from(frame: Frame) -> Self {
        Self {
            subscription: frame.get("subscription").map(String::from),
            destination: frame.get("destination").map(String::from),
            message_id: frame.get("message-id").map(String::from),
            body: frame.body,
        }
    }
}

/// Client-assigned subscription id (`sub-N`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── StompClient ──────────────────────────────────────────────────────

/// The live half of a connection: outbound queue plus liveness flag.
struct Live {
    outbound: mpsc::UnboundedSender<Frame>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

/// Single-connection STOMP client.
///
/// `connect` is safe to call concurrently: callers queue on an internal
/// gate and every caller after the first sees the already-live
/// connection.
pub struct StompClient {
    config: StompConfig,
    live: Mutex<Option<Live>>,
    connect_gate: tokio::sync::Mutex<()>,
    messages: broadcast::Sender<Arc<StompMessage>>,
    next_subscription: AtomicU64,
}

impl StompClient {
    pub fn new(config: StompConfig) -> Self {
        let (messages, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        Self {
            config,
            live: Mutex::new(None),
            connect_gate: tokio::sync::Mutex::new(()),
            messages,
            next_subscription: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &StompConfig {
        &self.config
    }

    /// Open the connection unless one is already live.
    ///
    /// Resolves once the broker answered `CONNECTED`, or with the
    /// handshake error. Never retries.
    pub async fn connect(&self) -> Result<(), Error> {
        let _gate = self.connect_gate.lock().await;

        if self.is_connected() {
            tracing::debug!("STOMP connection already live");
            return Ok(());
        }

        // Tear down the remains of a dropped connection first.
        if let Some(dead) = self.lock_live().take() {
            dead.cancel.cancel();
        }

        let timeout = self.config.connect_timeout;
        let live = tokio::time::timeout(timeout, self.open())
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: timeout.as_secs(),
            })??;

        *self.lock_live() = Some(live);
        Ok(())
    }

    /// Whether a physical connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.lock_live()
            .as_ref()
            .is_some_and(|live| live.connected.load(Ordering::Acquire))
    }

    /// Send `DISCONNECT` (best effort) and drop the connection.
    pub fn disconnect(&self) {
        if let Some(live) = self.lock_live().take() {
            let _ = live.outbound.send(Frame::new(Command::Disconnect));
            live.connected.store(false, Ordering::Release);
            live.cancel.cancel();
            tracing::info!("STOMP connection closed by client");
        }
    }

    /// Subscribe to `destination`. Fire-and-continue: the broker's
    /// acknowledgement is not awaited.
    pub fn subscribe(&self, destination: &str) -> Result<SubscriptionId, Error> {
        let n = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let id = SubscriptionId(format!("sub-{n}"));

        let frame = Frame::new(Command::Subscribe)
            .header("id", id.as_str())
            .header("destination", destination)
            .header("ack", "auto");
        self.send(frame)?;

        tracing::debug!(subscription = %id, destination, "subscribed");
        Ok(id)
    }

    /// Release a subscription on the live connection.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), Error> {
        self.send(Frame::new(Command::Unsubscribe).header("id", id.as_str()))?;
        tracing::debug!(subscription = %id, "unsubscribed");
        Ok(())
    }

    /// Get a receiver for inbound `MESSAGE` frames.
    ///
    /// The channel outlives individual connections, so one receiver keeps
    /// working across reconnects. Slow consumers see
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn messages(&self) -> broadcast::Receiver<Arc<StompMessage>> {
        self.messages.subscribe()
    }

    // ── internals ────────────────────────────────────────────────────

    fn lock_live(&self) -> MutexGuard<'_, Option<Live>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, frame: Frame) -> Result<(), Error> {
        let guard = self.lock_live();
        let live = guard
            .as_ref()
            .filter(|live| live.connected.load(Ordering::Acquire))
            .ok_or(Error::NotConnected)?;
        live.outbound.send(frame).map_err(|_| Error::NotConnected)
    }

    /// WebSocket upgrade, STOMP handshake, task spawn.
    async fn open(&self) -> Result<Live, Error> {
        let url = &self.config.url;
        tracing::info!(url = %url, "Connecting to update broker");

        let uri: tungstenite::http::Uri = url.as_str().parse().map_err(
            |e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()),
        )?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(ClientRequestBuilder::new(uri))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let host = self
            .config
            .virtual_host
            .clone()
            .or_else(|| url.host_str().map(String::from))
            .unwrap_or_else(|| "localhost".into());
        let connect = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", format!("{},0", self.config.heartbeat_ms));

        write
            .send(tungstenite::Message::Text(connect.encode().into()))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let connected_frame = await_connected(&mut read).await?;
        let heartbeat =
            stomp::negotiate_heartbeat(self.config.heartbeat_ms, connected_frame.get("heart-beat"));
        tracing::info!(
            version = connected_frame.get("version").unwrap_or("?"),
            heartbeat_ms = heartbeat.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            "STOMP session established"
        );

        let connected = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(writer_loop(
            write,
            outbound_rx,
            heartbeat,
            Arc::clone(&connected),
            cancel.clone(),
        ));
        tokio::spawn(reader_loop(
            read,
            self.messages.clone(),
            Arc::clone(&connected),
            cancel.clone(),
        ));

        Ok(Live {
            outbound,
            connected,
            cancel,
        })
    }
}

impl Drop for StompClient {
    fn drop(&mut self) {
        let live = self.live.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(live) = live.take() {
            live.cancel.cancel();
        }
    }
}

// ── Handshake ────────────────────────────────────────────────────────

/// Read frames until `CONNECTED` (success) or `ERROR` / close (failure).
async fn await_connected<S>(read: &mut S) -> Result<Frame, Error>
where
    S: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = read.next().await {
        match msg.map_err(|e| Error::WebSocketConnect(e.to_string()))? {
            tungstenite::Message::Text(text) => {
                for frame in Frame::decode_all(&text)? {
                    match frame.command {
                        Command::Connected => return Ok(frame),
                        Command::Error => {
                            let reason = frame.get("message").unwrap_or("").to_owned();
                            return Err(Error::WebSocketConnect(format!(
                                "broker rejected CONNECT: {reason} {}",
                                frame.body.trim()
                            )));
                        }
                        other => tracing::debug!(command = %other, "ignoring frame before CONNECTED"),
                    }
                }
            }
            tungstenite::Message::Close(frame) => {
                let (code, reason) = frame
                    .map(|cf| (u16::from(cf.code), cf.reason.to_string()))
                    .unwrap_or((1005, String::new()));
                return Err(Error::WebSocketClosed { code, reason });
            }
            _ => {}
        }
    }
    Err(Error::WebSocketClosed {
        code: 1006,
        reason: "stream ended during STOMP handshake".into(),
    })
}

// ── Background tasks ─────────────────────────────────────────────────

/// Drain the outbound queue into the socket and emit heartbeats.
async fn writer_loop<S>(
    mut write: S,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    heartbeat: Option<Duration>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    S: Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut beat = heartbeat.map(tokio::time::interval);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                // Flush whatever was queued before the cancel (DISCONNECT).
                while let Ok(frame) = outbound.try_recv() {
                    let _ = write.send(tungstenite::Message::Text(frame.encode().into())).await;
                }
                let _ = write.close().await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write.send(tungstenite::Message::Text(frame.encode().into())).await {
                    tracing::warn!(error = %e, command = %frame.command, "STOMP write failed");
                    break;
                }
            }
            () = next_beat(&mut beat) => {
                if let Err(e) = write.send(tungstenite::Message::Text("\n".into())).await {
                    tracing::warn!(error = %e, "STOMP heartbeat failed");
                    break;
                }
            }
        }
    }

    connected.store(false, Ordering::Release);
    cancel.cancel();
    tracing::debug!("STOMP writer exiting");
}

async fn next_beat(beat: &mut Option<tokio::time::Interval>) {
    match beat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Read frames until the socket drops, broadcasting `MESSAGE` bodies.
async fn reader_loop<S>(
    mut read: S,
    messages: broadcast::Sender<Arc<StompMessage>>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if !dispatch_frames(&text, &messages) {
                            break;
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite answers pings itself
                        tracing::trace!("WebSocket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "WebSocket close frame received");
                        } else {
                            tracing::info!("WebSocket close frame received (no payload)");
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket read error");
                        break;
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        break;
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }

    connected.store(false, Ordering::Release);
    cancel.cancel();
    tracing::debug!("STOMP reader exiting");
}

/// Decode one text message and broadcast its `MESSAGE` frames.
///
/// Returns `false` when the broker sent `ERROR`, after which it closes the
/// connection.
fn dispatch_frames(text: &str, messages: &broadcast::Sender<Arc<StompMessage>>) -> bool {
    let frames = match Frame::decode_all(text) {
        Ok(frames) => frames,
        Err(e) => {
            tracing::debug!(error = %e, "dropping undecodable STOMP text");
            return true;
        }
    };

    for frame in frames {
        match frame.command {
            Command::Message => {
                // No active receivers is fine.
                let _ = messages.send(Arc::new(StompMessage::from(frame)));
            }
            Command::Error => {
                tracing::warn!(
                    message = frame.get("message").unwrap_or(""),
                    body = %frame.body.trim(),
                    "broker sent ERROR frame"
                );
                return false;
            }
            Command::Receipt => tracing::trace!(receipt = frame.get("receipt-id"), "receipt"),
            other => tracing::debug!(command = %other, "ignoring unexpected frame"),
        }
    }
    true
}

// ── Tests ────────────────────────────────────────────────────────────
