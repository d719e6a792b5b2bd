//! Conversation persistence.
//!
//! The hub only needs the narrow [`ConversationGateway`] contract: look up a
//! conversation's participants and append a message to its log. The SQLite
//! store additionally backs the HTTP conversation endpoints.

mod memory;
mod models;
mod sqlite;

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

use crate::ids::{ConversationId, UserId};

pub use memory::MemoryConversationStore;
pub use models::{Conversation, Message, RemovalOutcome};
pub use sqlite::SqliteConversationStore;

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The conversation does not exist.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),

    /// The underlying database rejected the operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store refused the write (used by stores without a database).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Persistence contract consumed by the hub.
#[async_trait]
pub trait ConversationGateway: Send + Sync {
    /// Participant set of a conversation, or [`StoreError::NotFound`].
    async fn participants_of(
        &self,
        conversation: &ConversationId,
    ) -> Result<HashSet<UserId>, StoreError>;

    /// Append a message to the conversation log and return the persisted record.
    async fn append(
        &self,
        conversation: &ConversationId,
        author: &UserId,
        text: &str,
    ) -> Result<Message, StoreError>;
}
