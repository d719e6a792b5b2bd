//! Hub: the single owner of the live-connection set.
//!
//! Every mutation of the set goes through one control loop fed by separate
//! channels for registration, unregistration, broadcast and snapshot queries.
//! The loop polls them in a fixed priority order, so a registration that was
//! queued before a broadcast is always applied before that broadcast fans out.
//! Snapshot queries are also answered between broadcasts, so a steady stream
//! of chat traffic cannot starve them.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::connection::{ConnectionHandle, ConnectionId, DeliveryError};
use super::types::OutboundFrame;
use crate::ids::{ConversationId, UserId};
use crate::store::{ConversationGateway, StoreError};

/// Hub behaviour switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Capacity of the broadcast and query channels.
    pub control_capacity: usize,
    /// Deliver a message back to its author's own connection.
    pub echo_to_sender: bool,
    /// Drop messages whose author is not a participant of the conversation.
    pub require_membership: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            control_capacity: 1024,
            echo_to_sender: true,
            require_membership: true,
        }
    }
}

impl HubConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.control_capacity == 0 {
            anyhow::bail!("hub.control_capacity must be at least 1");
        }
        Ok(())
    }
}

/// The hub's control loop has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("hub is not running")]
pub struct HubClosed;

/// A chat message to persist and fan out.
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub conversation_id: ConversationId,
    /// Identity bound to the sending connection.
    pub author: UserId,
    /// Already normalized text.
    pub text: String,
    /// Connection the message arrived on.
    pub origin: ConnectionId,
}

/// Point-in-time view of who is online.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubSnapshot {
    pub connections: BTreeMap<UserId, ConnectionId>,
}

impl HubSnapshot {
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.connections.contains_key(user)
    }

    pub fn connection_of(&self, user: &UserId) -> Option<ConnectionId> {
        self.connections.get(user).copied()
    }

    pub fn users(&self) -> impl Iterator<Item = &UserId> {
        self.connections.keys()
    }
}

#[derive(Debug)]
struct Unregister {
    user: UserId,
    connection: ConnectionId,
}

/// Work that is processed strictly in arrival order.
#[derive(Debug)]
enum Command {
    Broadcast(BroadcastRequest),
    Flush(oneshot::Sender<HubSnapshot>),
}

/// Cloneable handle used to talk to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<ConnectionHandle>,
    unregister_tx: mpsc::UnboundedSender<Unregister>,
    broadcast_tx: mpsc::Sender<Command>,
    query_tx: mpsc::Sender<oneshot::Sender<HubSnapshot>>,
}

impl HubHandle {
    /// Add a connection to the live set. An existing connection for the same
    /// user is replaced and its outbound queue closed.
    pub fn register(&self, connection: ConnectionHandle) -> Result<(), HubClosed> {
        self.register_tx.send(connection).map_err(|_| HubClosed)
    }

    /// Remove `connection` if it is still the live entry for `user`.
    /// Unregistering an absent or superseded connection does nothing.
    pub fn unregister(&self, user: UserId, connection: ConnectionId) -> Result<(), HubClosed> {
        self.unregister_tx
            .send(Unregister { user, connection })
            .map_err(|_| HubClosed)
    }

    /// Queue a message for persistence and fan-out. Waits only if the
    /// broadcast channel is full.
    pub async fn broadcast(&self, request: BroadcastRequest) -> Result<(), HubClosed> {
        self.broadcast_tx
            .send(Command::Broadcast(request))
            .await
            .map_err(|_| HubClosed)
    }

    /// Current live set. Every registration and unregistration queued before
    /// this call is reflected; queued broadcasts may still be pending. Waits
    /// for at most the broadcast currently in progress.
    pub async fn snapshot(&self) -> Result<HubSnapshot, HubClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.query_tx.send(reply_tx).await.map_err(|_| HubClosed)?;
        reply_rx.await.map_err(|_| HubClosed)
    }

    /// Wait until every broadcast queued before this call has been persisted
    /// and fanned out, then return the live set.
    pub async fn flush(&self) -> Result<HubSnapshot, HubClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.broadcast_tx
            .send(Command::Flush(reply_tx))
            .await
            .map_err(|_| HubClosed)?;
        reply_rx.await.map_err(|_| HubClosed)
    }
}

/// The control loop state. Only reachable through a [`HubHandle`].
pub struct Hub {
    gateway: Arc<dyn ConversationGateway>,
    config: HubConfig,
    connections: HashMap<UserId, ConnectionHandle>,
    register_rx: mpsc::UnboundedReceiver<ConnectionHandle>,
    unregister_rx: mpsc::UnboundedReceiver<Unregister>,
    broadcast_rx: mpsc::Receiver<Command>,
    query_rx: mpsc::Receiver<oneshot::Sender<HubSnapshot>>,
}

impl Hub {
    /// Start the control loop on the current runtime.
    ///
    /// The loop runs until every handle has been dropped.
    pub fn spawn(gateway: Arc<dyn ConversationGateway>, config: HubConfig) -> HubHandle {
        let capacity = config.control_capacity.max(1);
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (query_tx, query_rx) = mpsc::channel(capacity);

        let hub = Self {
            gateway,
            config,
            connections: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            query_rx,
        };
        tokio::spawn(hub.run());

        HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            query_tx,
        }
    }

    async fn run(mut self) {
        info!(
            "Hub started (echo_to_sender={}, require_membership={})",
            self.config.echo_to_sender, self.config.require_membership
        );

        loop {
            tokio::select! {
                biased;

                Some(connection) = self.register_rx.recv() => self.register(connection),
                Some(request) = self.unregister_rx.recv() => self.unregister(request),
                Some(command) = self.broadcast_rx.recv() => {
                    match command {
                        Command::Broadcast(request) => self.broadcast(request).await,
                        Command::Flush(reply) => {
                            let _ = reply.send(self.snapshot());
                        }
                    }
                    self.answer_queries();
                }
                Some(reply) = self.query_rx.recv() => {
                    let _ = reply.send(self.snapshot());
                }
                else => break,
            }
        }

        info!("Hub stopped with {} live connections", self.connections.len());
    }

    /// Reply to every waiting snapshot query. Membership changes queued
    /// ahead of a query are applied first so its answer includes them.
    fn answer_queries(&mut self) {
        while let Ok(connection) = self.register_rx.try_recv() {
            self.register(connection);
        }
        while let Ok(request) = self.unregister_rx.try_recv() {
            self.unregister(request);
        }
        while let Ok(reply) = self.query_rx.try_recv() {
            let _ = reply.send(self.snapshot());
        }
    }

    fn register(&mut self, connection: ConnectionHandle) {
        let user = connection.user().clone();
        let id = connection.id();
        match self.connections.insert(user.clone(), connection) {
            Some(previous) => info!(
                "{} replaces {} for user {}, closing the old session",
                id,
                previous.id(),
                user
            ),
            None => debug!("{} online for user {}", id, user),
        }
    }

    fn unregister(&mut self, request: Unregister) {
        let is_current = self
            .connections
            .get(&request.user)
            .is_some_and(|current| current.id() == request.connection);

        if is_current {
            self.connections.remove(&request.user);
            debug!("{} offline for user {}", request.connection, request.user);
        } else {
            debug!(
                "Ignoring unregister of {} for user {}: not the live connection",
                request.connection, request.user
            );
        }
    }

    async fn broadcast(&mut self, request: BroadcastRequest) {
        let BroadcastRequest {
            conversation_id,
            author,
            text,
            origin,
        } = request;

        let participants = match self.gateway.participants_of(&conversation_id).await {
            Ok(participants) => participants,
            Err(StoreError::NotFound(_)) => {
                warn!(
                    "Dropping message from {} ({}): unknown conversation {}",
                    author, origin, conversation_id
                );
                return;
            }
            Err(e) => {
                error!(
                    "Participant lookup for {} failed, dropping message from {}: {}",
                    conversation_id, author, e
                );
                return;
            }
        };

        if self.config.require_membership && !participants.contains(&author) {
            warn!(
                "Dropping message from {} ({}): not a participant of {}",
                author, origin, conversation_id
            );
            return;
        }

        let message = match self.gateway.append(&conversation_id, &author, &text).await {
            Ok(message) => message,
            Err(e) => {
                error!(
                    "Failed to persist message from {} to {}: {}",
                    author, conversation_id, e
                );
                return;
            }
        };

        let frame = OutboundFrame::from(&message);
        let mut evicted = Vec::new();
        let mut delivered = 0usize;

        for user in &participants {
            if !self.config.echo_to_sender && *user == author {
                continue;
            }
            let Some(connection) = self.connections.get(user) else {
                continue;
            };
            match connection.try_deliver(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::SlowConsumer) => {
                    warn!(
                        "{} for user {} is not keeping up, disconnecting",
                        connection.id(),
                        user
                    );
                    evicted.push(user.clone());
                }
                Err(DeliveryError::Disconnected) => {
                    debug!("{} for user {} is closing or gone", connection.id(), user);
                    evicted.push(user.clone());
                }
            }
        }

        // Dropping the handle closes the queue; the writer then sends Close.
        for user in evicted {
            self.connections.remove(&user);
        }

        debug!(
            "Message {} in {} delivered to {} of {} participants",
            message.id,
            conversation_id,
            delivered,
            participants.len()
        );
    }

    fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            connections: self
                .connections
                .iter()
                .map(|(user, connection)| (user.clone(), connection.id()))
                .collect(),
        }
    }
}
