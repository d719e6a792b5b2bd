//! Real-time chat over WebSocket.
//!
//! ```text
//! client ──► ws_handler ──verify──► serve_connection ──register──► Hub
//!                                     │ read_pump  ──broadcast──►   │
//!                                     │ write_pump ◄──mailbox──────┘
//! ```
//!
//! The [`Hub`] task is the only owner of the live-connection set. Connections
//! talk to it through a cloneable [`HubHandle`] and receive outbound frames
//! through a bounded per-connection [`Mailbox`].

mod connection;
mod handler;
mod hub;
mod types;

pub use connection::{
    ConnectionConfig, ConnectionError, ConnectionHandle, ConnectionId, DeliveryError, Liveness,
    LivenessState, Mailbox, read_pump, serve_connection, write_pump,
};
pub use handler::{WsParams, ws_handler};
pub use hub::{BroadcastRequest, Hub, HubClosed, HubConfig, HubHandle, HubSnapshot};
pub use types::{InboundFrame, OutboundFrame, normalize_text};
