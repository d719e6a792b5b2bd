//! Application state shared across handlers.

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::store::SqliteConversationStore;
use crate::ws::{ConnectionConfig, HubHandle};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Bearer token verifier, shared by the auth middleware and the WebSocket bootstrap.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Conversation store backing the REST endpoints.
    pub conversations: Arc<SqliteConversationStore>,
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Limits applied to every new WebSocket connection.
    pub connection: ConnectionConfig,
    /// Origins allowed by the CORS layer.
    pub allowed_origins: Vec<String>,
}

impl AppState {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        conversations: Arc<SqliteConversationStore>,
        hub: HubHandle,
        connection: ConnectionConfig,
        allowed_origins: Vec<String>,
    ) -> Self {
        Self {
            verifier,
            conversations,
            hub,
            connection,
            allowed_origins,
        }
    }
}
