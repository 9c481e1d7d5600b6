//! In-memory storage implementations
//!
//! These implementations keep documents in `RwLock<HashMap>` tables.
//! Data is lost when the process exits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::models::{
    chat::{Chat, ChatStats, ChatSummary, DEFAULT_CHAT_TITLE, TurnPair},
    file::FileRecord,
    session::Session,
};

use super::traits::{ChatStore, FileStore, SessionStore, StoreError, StoreResult};

// ============================================================================
// InMemoryChatStore
// ============================================================================

/// Suitable for development, tests and single-instance deployments.
#[derive(Default)]
pub struct InMemoryChatStore {
    chats: RwLock<HashMap<String, Chat>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn create(&self, chat: Chat) -> StoreResult<Chat> {
        self.chats.write().insert(chat.id.clone(), chat.clone());
        info!("Created chat {} for user {}", chat.id, chat.user_id);
        Ok(chat)
    }

    async fn get(&self, chat_id: &str, user_id: &str) -> StoreResult<Option<Chat>> {
        Ok(self
            .chats
            .read()
            .get(chat_id)
            .filter(|chat| chat.user_id == user_id)
            .cloned())
    }

    async fn append_turns(
        &self,
        chat_id: &str,
        user_id: &str,
        pair: TurnPair,
    ) -> StoreResult<()> {
        let mut chats = self.chats.write();

        let chat = chats.entry(chat_id.to_string()).or_insert_with(|| {
            debug!("Upserting chat {} on first append", chat_id);
            Chat::new(
                chat_id.to_string(),
                DEFAULT_CHAT_TITLE.to_string(),
                user_id.to_string(),
            )
        });

        if chat.user_id != user_id {
            return Err(StoreError::NotOwned(chat_id.to_string()));
        }

        chat.messages.push(pair.user);
        chat.messages.push(pair.assistant);
        chat.metadata.message_count += 2;
        chat.metadata.total_tokens += pair.tokens;
        chat.metadata.model = pair.model;
        chat.updated_at = Utc::now();

        Ok(())
    }

    async fn list(&self, user_id: &str, limit: usize) -> StoreResult<Vec<ChatSummary>> {
        let mut summaries: Vec<ChatSummary> = self
            .chats
            .read()
            .values()
            .filter(|chat| chat.user_id == user_id)
            .map(Chat::summary)
            .collect();

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn rename(&self, chat_id: &str, user_id: &str, title: &str) -> StoreResult<()> {
        let mut chats = self.chats.write();

        match chats.get_mut(chat_id) {
            Some(chat) if chat.user_id == user_id => {
                chat.title = title.to_string();
                chat.updated_at = Utc::now();
                Ok(())
            },
            _ => Err(StoreError::chat_not_found()),
        }
    }

    async fn remove(&self, chat_id: &str, user_id: &str) -> StoreResult<()> {
        let mut chats = self.chats.write();

        match chats.get(chat_id) {
            Some(chat) if chat.user_id == user_id => {
                chats.remove(chat_id);
                info!("Deleted chat {}", chat_id);
                Ok(())
            },
            _ => Err(StoreError::chat_not_found()),
        }
    }

    async fn cleanup_older_than(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut chats = self.chats.write();
        let before = chats.len();

        chats.retain(|_, chat| !(chat.user_id == user_id && chat.updated_at < cutoff));

        let removed = (before - chats.len()) as u64;
        if removed > 0 {
            info!("Cleaned up {} old chats for user {}", removed, user_id);
        }
        Ok(removed)
    }

    async fn stats(&self, user_id: &str) -> StoreResult<ChatStats> {
        let chats = self.chats.read();
        let owned = chats.values().filter(|chat| chat.user_id == user_id);

        let (total_chats, total_messages) = owned.fold((0, 0), |(chats, messages), chat| {
            (chats + 1, messages + chat.metadata.message_count)
        });

        Ok(ChatStats {
            total_chats,
            total_messages,
            total_files: 0,
        })
    }
}

// ============================================================================
// InMemoryFileStore
// ============================================================================

#[derive(Default)]
pub struct InMemoryFileStore {
    files: RwLock<HashMap<String, FileRecord>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn create(&self, file: FileRecord) -> StoreResult<FileRecord> {
        self.files.write().insert(file.id.clone(), file.clone());
        Ok(file)
    }

    async fn get(&self, file_id: &str, user_id: &str) -> StoreResult<Option<FileRecord>> {
        Ok(self
            .files
            .read()
            .get(file_id)
            .filter(|file| file.user_id == user_id)
            .cloned())
    }

    async fn delete(&self, file_id: &str, user_id: &str) -> StoreResult<()> {
        let mut files = self.files.write();

        match files.get(file_id) {
            Some(file) if file.user_id == user_id => {
                files.remove(file_id);
                Ok(())
            },
            _ => Err(StoreError::file_not_found()),
        }
    }

    async fn count(&self, user_id: &str) -> StoreResult<u64> {
        Ok(self
            .files
            .read()
            .values()
            .filter(|file| file.user_id == user_id)
            .count() as u64)
    }
}

// ============================================================================
// InMemorySessionStore
// ============================================================================

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: Session) -> StoreResult<Session> {
        self.sessions
            .write()
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> StoreResult<Option<Session>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();

        sessions.retain(|_, session| !session.is_expired(now));

        Ok((before - sessions.len()) as u64)
    }
}
