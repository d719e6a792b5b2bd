//! One live WebSocket session bound to one authenticated user.
//!
//! Each connection runs two paths concurrently: the read path decodes inbound
//! chat frames and forwards them to the hub, the write path drains the
//! connection's bounded outbound queue back onto the socket and keeps the
//! peer alive with periodic pings. Whichever path stops first tears the whole
//! connection down and the hub is notified exactly once.

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::hub::{BroadcastRequest, HubClosed, HubHandle};
use super::types::{InboundFrame, OutboundFrame, normalize_text};
use crate::ids::UserId;

/// Per-connection limits and timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Capacity of the outbound queue. A full queue marks a slow consumer.
    pub queue_capacity: usize,
    /// Largest accepted inbound message, in bytes.
    pub max_message_size: usize,
    /// The peer is considered dead after this long without any inbound data.
    pub read_timeout_ms: u64,
    /// Deadline for each individual write to the socket.
    pub write_timeout_ms: u64,
    /// Keepalive ping period. Defaults to 9/10 of the read timeout.
    pub ping_interval_ms: Option<u64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_message_size: 512,
            read_timeout_ms: 60_000,
            write_timeout_ms: 10_000,
            ping_interval_ms: None,
        }
    }
}

impl ConnectionConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        let millis = self
            .ping_interval_ms
            .unwrap_or(self.read_timeout_ms * 9 / 10);
        Duration::from_millis(millis.max(1))
    }

    /// Check the limits are usable together.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_capacity == 0 {
            anyhow::bail!("connection.queue_capacity must be at least 1");
        }
        if self.max_message_size == 0 {
            anyhow::bail!("connection.max_message_size must be at least 1");
        }
        if self.write_timeout_ms == 0 {
            anyhow::bail!("connection.write_timeout_ms must be positive");
        }
        if self.ping_interval() >= self.read_timeout() {
            anyhow::bail!(
                "connection ping interval ({:?}) must be shorter than the read timeout ({:?})",
                self.ping_interval(),
                self.read_timeout()
            );
        }
        Ok(())
    }
}

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The outbound queue is full.
    #[error("outbound queue is full")]
    SlowConsumer,
    /// The write path has already gone away.
    #[error("connection writer is gone")]
    Disconnected,
}

/// Transport-level failures that end a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("inbound message of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error(transparent)]
    HubClosed(#[from] HubClosed),
}

/// The hub's side of a connection: identity, the producer end of the
/// outbound queue and the connection's shared [`Liveness`]. The hub holds the
/// only producer, so dropping the handle closes the queue and lets the write
/// path finish.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user: UserId,
    outbound: mpsc::Sender<OutboundFrame>,
    liveness: Arc<Liveness>,
}

impl ConnectionHandle {
    /// Create a handle and the mailbox its write path drains.
    pub fn new(user: UserId, queue_capacity: usize) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = Self {
            id: ConnectionId::next(),
            user,
            outbound: tx,
            liveness: Arc::default(),
        };
        (handle, Mailbox { rx })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Lifecycle flag shared with the task serving this connection.
    pub fn liveness(&self) -> Arc<Liveness> {
        Arc::clone(&self.liveness)
    }

    pub fn is_active(&self) -> bool {
        self.liveness.get() == LivenessState::Active
    }

    /// Queue a frame without waiting. A connection that has started closing
    /// accepts nothing further and reports [`DeliveryError::Disconnected`].
    pub fn try_deliver(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        if !self.is_active() {
            return Err(DeliveryError::Disconnected);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::SlowConsumer,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }
}

/// Consumer end of a connection's outbound queue.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<OutboundFrame>,
}

impl Mailbox {
    /// Wait for the next frame. `None` once the hub has closed the queue.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.rx.recv().await
    }

    /// Take a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.rx.try_recv().ok()
    }

    /// Take every frame that is already queued.
    pub fn drain_ready(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Lifecycle of a connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LivenessState {
    Active = 0,
    Closing = 1,
    Closed = 2,
}

/// Shared, monotonic liveness flag. The serving task advances it; the hub
/// stops delivering to, and evicts, any connection that is no longer active.
#[derive(Debug, Default)]
pub struct Liveness(AtomicU8);

impl Liveness {
    pub fn get(&self) -> LivenessState {
        Self::decode(self.0.load(Ordering::Acquire))
    }

    /// Move to `state` unless already past it. Returns the previous state.
    pub fn advance(&self, state: LivenessState) -> LivenessState {
        Self::decode(self.0.fetch_max(state as u8, Ordering::AcqRel))
    }

    fn decode(raw: u8) -> LivenessState {
        match raw {
            0 => LivenessState::Active,
            1 => LivenessState::Closing,
            _ => LivenessState::Closed,
        }
    }
}

/// Read path: decode inbound frames and forward them to the hub.
///
/// Returns `Ok(())` when the peer closes cleanly. Any transport or decode
/// error, an oversized message, or silence longer than the read timeout ends
/// the path with an error.
pub async fn read_pump<S, E>(
    mut stream: S,
    hub: &HubHandle,
    user: &UserId,
    connection: ConnectionId,
    config: &ConnectionConfig,
) -> Result<(), ConnectionError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let idle = config.read_timeout();

    loop {
        let message = match tokio::time::timeout(idle, stream.next()).await {
            Err(_) => return Err(ConnectionError::IdleTimeout(idle)),
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(ConnectionError::Transport(e.to_string())),
            Ok(Some(Ok(message))) => message,
        };

        let payload: &[u8] = match &message {
            Message::Text(text) => text.as_str().as_bytes(),
            Message::Binary(data) => data.as_ref(),
            // Keepalive traffic only refreshes the idle timer.
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(frame) => {
                debug!("{} closed by peer: {:?}", connection, frame);
                return Ok(());
            }
        };

        if payload.len() > config.max_message_size {
            return Err(ConnectionError::FrameTooLarge {
                size: payload.len(),
                limit: config.max_message_size,
            });
        }

        let frame = InboundFrame::decode(payload)?;
        let text = normalize_text(&frame.text);
        if text.is_empty() {
            debug!("{} sent an empty message, ignoring", connection);
            continue;
        }
        if let Some(claimed) = frame.claimed_user.as_ref().filter(|c| *c != user) {
            debug!(
                "{} claimed author {} but is bound to {}, using bound identity",
                connection, claimed, user
            );
        }

        hub.broadcast(BroadcastRequest {
            conversation_id: frame.conversation_id,
            author: user.clone(),
            text,
            origin: connection,
        })
        .await?;
    }
}

/// Write path: drain the outbound queue onto the socket and ping the peer.
///
/// Frames that piled up since the last wakeup go out in one burst with a
/// single flush. When the hub closes the queue a Close frame is sent and the
/// path ends with `Ok(())`.
pub async fn write_pump<W>(
    mut sink: W,
    mut mailbox: Mailbox,
    config: &ConnectionConfig,
) -> Result<(), ConnectionError>
where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    let deadline = config.write_timeout();
    let period = config.ping_interval();
    let mut ping = tokio::time::interval_at(Instant::now() + period, period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = mailbox.recv() => {
                let Some(first) = next else {
                    let _ = with_deadline(deadline, sink.send(Message::Close(None))).await;
                    return Ok(());
                };

                let mut burst = vec![first];
                burst.extend(mailbox.drain_ready());
                for frame in burst {
                    let json = match frame.encode() {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to serialize outbound frame: {}", e);
                            continue;
                        }
                    };
                    with_deadline(deadline, sink.feed(Message::Text(json.into()))).await?;
                }
                with_deadline(deadline, sink.flush()).await?;
            }

            _ = ping.tick() => {
                with_deadline(deadline, sink.send(Message::Ping(Bytes::new()))).await?;
            }
        }
    }
}

async fn with_deadline<F, E>(deadline: Duration, op: F) -> Result<(), ConnectionError>
where
    F: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    match tokio::time::timeout(deadline, op).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Transport(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout(deadline)),
    }
}

enum Ended {
    Reader(Result<(), ConnectionError>),
    Writer(Result<Result<(), ConnectionError>, tokio::task::JoinError>),
}

/// Run an upgraded socket for `user` until either path stops.
///
/// The connection is registered with the hub before either path starts and
/// unregistered exactly once when it ends.
pub async fn serve_connection(
    socket: WebSocket,
    hub: HubHandle,
    user: UserId,
    config: ConnectionConfig,
) {
    let (handle, mailbox) = ConnectionHandle::new(user.clone(), config.queue_capacity);
    let id = handle.id();
    let liveness = handle.liveness();
    if let Err(e) = hub.register(handle) {
        warn!("Dropping connection for user {}: {}", user, e);
        return;
    }
    info!("{} registered for user {}", id, user);

    let (sink, stream) = socket.split();

    let write_config = config.clone();
    let mut writer =
        tokio::spawn(async move { write_pump(sink, mailbox, &write_config).await });

    let ended = tokio::select! {
        result = read_pump(stream, &hub, &user, id, &config) => Ended::Reader(result),
        joined = &mut writer => Ended::Writer(joined),
    };
    // From here on the hub refuses to queue frames for this connection.
    liveness.advance(LivenessState::Closing);

    match &ended {
        Ended::Reader(Ok(())) => info!("{} closed by user {}", id, user),
        Ended::Reader(Err(e)) => info!("{} read path ended for user {}: {}", id, user, e),
        Ended::Writer(Ok(Ok(()))) => info!("{} outbound queue closed by hub", id),
        Ended::Writer(Ok(Err(e))) => warn!("{} write path failed for user {}: {}", id, user, e),
        Ended::Writer(Err(e)) => warn!("{} writer task failed: {}", id, e),
    }

    if let Err(e) = hub.unregister(user.clone(), id) {
        debug!("{} could not be unregistered: {}", id, e);
    }

    // Once unregistered, the hub drops the queue's producer and the writer
    // sends its Close frame.
    if matches!(ended, Ended::Reader(_)) {
        let grace = config.write_timeout() * 2;
        if tokio::time::timeout(grace, &mut writer).await.is_err() {
            debug!("{} writer did not stop within {:?}, aborting", id, grace);
            writer.abort();
        }
    }

    liveness.advance(LivenessState::Closed);
    debug!("{} is {:?}", id, liveness.get());
}
