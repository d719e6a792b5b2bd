//! In-memory conversation store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ConversationGateway, Message, StoreError};
use crate::ids::{ConversationId, UserId};

#[derive(Debug, Default)]
struct Record {
    participants: HashSet<UserId>,
    messages: Vec<Message>,
}

/// Conversation store kept entirely in process memory.
///
/// Appends can be made to fail on demand, which lets callers exercise the
/// persistence-failure path of the hub.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    records: Mutex<HashMap<ConversationId, Record>>,
    fail_appends: AtomicBool,
}

impl MemoryConversationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a conversation with the given participants.
    pub fn insert_conversation(
        &self,
        id: impl Into<ConversationId>,
        participants: impl IntoIterator<Item = UserId>,
    ) {
        let record = Record {
            participants: participants.into_iter().collect(),
            messages: Vec::new(),
        };
        self.lock().insert(id.into(), record);
    }

    /// Messages appended to a conversation, oldest first.
    pub fn history(&self, conversation: &ConversationId) -> Result<Vec<Message>, StoreError> {
        self.lock()
            .get(conversation)
            .map(|record| record.messages.clone())
            .ok_or_else(|| StoreError::NotFound(conversation.clone()))
    }

    /// Make subsequent appends fail (or succeed again).
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ConversationGateway for MemoryConversationStore {
    async fn participants_of(
        &self,
        conversation: &ConversationId,
    ) -> Result<HashSet<UserId>, StoreError> {
        self.lock()
            .get(conversation)
            .map(|record| record.participants.clone())
            .ok_or_else(|| StoreError::NotFound(conversation.clone()))
    }

    async fn append(
        &self,
        conversation: &ConversationId,
        author: &UserId,
        text: &str,
    ) -> Result<Message, StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("appends disabled".to_string()));
        }

        let mut records = self.lock();
        let record = records
            .get_mut(conversation)
            .ok_or_else(|| StoreError::NotFound(conversation.clone()))?;

        let now = Utc::now();
        let created_at = match record.messages.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation.clone(),
            author: author.clone(),
            text: text.to_string(),
            created_at,
        };
        record.messages.push(message.clone());
        Ok(message)
    }
}
