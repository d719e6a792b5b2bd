//! SQLite-backed conversation store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;
use std::collections::HashSet;

use super::models::millis_to_datetime;
use super::{Conversation, ConversationGateway, Message, RemovalOutcome, StoreError};
use crate::db::Database;
use crate::ids::{ConversationId, UserId};

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: String,
    name: String,
    author_id: String,
    created_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    author_id: String,
    text: String,
    created_at: i64,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            conversation_id: ConversationId::from(row.conversation_id),
            author: UserId::from(row.author_id),
            text: row.text,
            created_at: millis_to_datetime(row.created_at),
        }
    }
}

/// Conversation store over the application's SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Create a store sharing the database's connection pool.
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Create a conversation. The author becomes its first participant.
    pub async fn create_conversation(
        &self,
        name: &str,
        author: &UserId,
    ) -> Result<Conversation, StoreError> {
        let id = ConversationId::generate();
        let now = Utc::now().timestamp_millis();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO conversations (id, name, author_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(name)
        .bind(author.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id, joined_at) VALUES (?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(author.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_conversation(&id).await
    }

    /// Fetch a conversation with its participants.
    pub async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation, StoreError> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, name, author_id, created_at FROM conversations WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        self.hydrate(row).await
    }

    /// List the conversations a user participates in, newest first.
    pub async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT c.id, c.name, c.author_id, c.created_at
            FROM conversations c
            JOIN conversation_participants p ON p.conversation_id = c.id
            WHERE p.user_id = ?
            ORDER BY c.created_at DESC, c.id
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            conversations.push(self.hydrate(row).await?);
        }
        Ok(conversations)
    }

    /// Add a participant. Adding an existing participant is a no-op.
    pub async fn add_participant(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<(), StoreError> {
        self.ensure_exists(conversation).await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id, joined_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(conversation.as_str())
        .bind(user.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a participant. Removing the author deletes the whole conversation.
    pub async fn remove_participant(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<RemovalOutcome, StoreError> {
        let existing = self.get_conversation(conversation).await?;

        if existing.author == *user {
            sqlx::query("DELETE FROM conversations WHERE id = ?")
                .bind(conversation.as_str())
                .execute(&self.pool)
                .await?;
            return Ok(RemovalOutcome::ConversationDeleted);
        }

        sqlx::query("DELETE FROM conversation_participants WHERE conversation_id = ? AND user_id = ?")
            .bind(conversation.as_str())
            .bind(user.as_str())
            .execute(&self.pool)
            .await?;
        Ok(RemovalOutcome::ParticipantRemoved)
    }

    /// Message history in append order. With a limit, the most recent `limit`
    /// messages are returned (still oldest first).
    pub async fn history(
        &self,
        conversation: &ConversationId,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, StoreError> {
        self.ensure_exists(conversation).await?;

        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(i64::from).unwrap_or(-1);
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, conversation_id, author_id, text, created_at FROM (
                SELECT seq, id, conversation_id, author_id, text, created_at
                FROM messages
                WHERE conversation_id = ?
                ORDER BY seq DESC
                LIMIT ?
            )
            ORDER BY seq ASC
            "#,
        )
        .bind(conversation.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn ensure_exists(&self, conversation: &ConversationId) -> Result<(), StoreError> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM conversations WHERE id = ?")
            .bind(conversation.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(conversation.clone())),
        }
    }

    async fn participant_ids(&self, conversation: &str) -> Result<Vec<UserId>, StoreError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = ? ORDER BY joined_at, user_id",
        )
        .bind(conversation)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(UserId::from).collect())
    }

    async fn hydrate(&self, row: ConversationRow) -> Result<Conversation, StoreError> {
        let participants = self.participant_ids(&row.id).await?;
        Ok(Conversation {
            id: ConversationId::from(row.id),
            name: row.name,
            author: UserId::from(row.author_id),
            participants,
            created_at: millis_to_datetime(row.created_at),
        })
    }
}

#[async_trait]
impl ConversationGateway for SqliteConversationStore {
    async fn participants_of(
        &self,
        conversation: &ConversationId,
    ) -> Result<HashSet<UserId>, StoreError> {
        self.ensure_exists(conversation).await?;
        Ok(self
            .participant_ids(conversation.as_str())
            .await?
            .into_iter()
            .collect())
    }

    async fn append(
        &self,
        conversation: &ConversationId,
        author: &UserId,
        text: &str,
    ) -> Result<Message, StoreError> {
        // One statement, so SQLite takes the write lock before reading the
        // latest timestamp and the busy timeout covers contention with other
        // writers. Timestamps never go backwards within a conversation, even
        // if the wall clock does. No row back means no such conversation.
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        let created_at = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO messages (id, conversation_id, author_id, text, created_at)
            SELECT ?, c.id, ?, ?, MAX(?, COALESCE(
                (SELECT MAX(m.created_at) FROM messages m WHERE m.conversation_id = c.id),
                ?
            ))
            FROM conversations c
            WHERE c.id = ?
            RETURNING created_at
            "#,
        )
        .bind(&id)
        .bind(author.as_str())
        .bind(text)
        .bind(now)
        .bind(now)
        .bind(conversation.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(conversation.clone()))?;

        Ok(Message {
            id,
            conversation_id: conversation.clone(),
            author: author.clone(),
            text: text.to_string(),
            created_at: millis_to_datetime(created_at),
        })
    }
}
