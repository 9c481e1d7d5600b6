//! Storage trait definitions
//!
//! Every read and write is scoped by the owning user id. Implementations must
//! be thread-safe (Send + Sync) as they are shared across request tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    chat::{Chat, ChatStats, ChatSummary, TurnPair},
    file::FileRecord,
    session::Session,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Carries the entity name, e.g. "Chat" or "File".
    #[error("{0} not found")]
    NotFound(String),

    #[error("chat {0} is owned by another user")]
    NotOwned(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn chat_not_found() -> Self {
        StoreError::NotFound("Chat".to_string())
    }

    pub fn file_not_found() -> Self {
        StoreError::NotFound("File".to_string())
    }
}

impl From<neo4rs::Error> for StoreError {
    fn from(err: neo4rs::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<neo4rs::DeError> for StoreError {
    fn from(err: neo4rs::DeError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Inserts a new chat document.
    async fn create(&self, chat: Chat) -> StoreResult<Chat>;

    async fn get(&self, chat_id: &str, user_id: &str) -> StoreResult<Option<Chat>>;

    /// Appends a user/assistant pair in one atomic step, creating the chat
    /// when it does not exist yet. Fails with `NotOwned` when the chat exists
    /// under another user.
    async fn append_turns(&self, chat_id: &str, user_id: &str, pair: TurnPair)
    -> StoreResult<()>;

    /// Most recently updated first.
    async fn list(&self, user_id: &str, limit: usize) -> StoreResult<Vec<ChatSummary>>;

    async fn rename(&self, chat_id: &str, user_id: &str, title: &str) -> StoreResult<()>;

    async fn remove(&self, chat_id: &str, user_id: &str) -> StoreResult<()>;

    /// Removes the user's chats whose `updated_at` is strictly before `cutoff`.
    async fn cleanup_older_than(&self, user_id: &str, cutoff: DateTime<Utc>)
    -> StoreResult<u64>;

    /// Chat count and summed turn count for one user.
    async fn stats(&self, user_id: &str) -> StoreResult<ChatStats>;
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn create(&self, file: FileRecord) -> StoreResult<FileRecord>;

    async fn get(&self, file_id: &str, user_id: &str) -> StoreResult<Option<FileRecord>>;

    async fn delete(&self, file_id: &str, user_id: &str) -> StoreResult<()>;

    async fn count(&self, user_id: &str) -> StoreResult<u64>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: Session) -> StoreResult<Session>;

    async fn get(&self, session_id: &str) -> StoreResult<Option<Session>>;

    /// Removes every session whose expiry lies before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}
