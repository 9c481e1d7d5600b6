//! Neo4j storage implementations
//!
//! Labels are prefixed with "Memchat" to avoid conflicts with other applications.
//! Timestamps are stored as fixed-width RFC 3339 strings (millisecond
//! precision, `Z` suffix) so that string comparison orders them correctly.
//!
//! ## Schema
//!
//! ```cypher
//! (:MemchatChat {
//!     id: String,
//!     user_id: String,
//!     title: String,
//!     model: String,
//!     total_tokens: Int,
//!     message_count: Int,
//!     created_at: String,
//!     updated_at: String
//! })
//!
//! (:MemchatMessage {
//!     id: String,
//!     role: String,
//!     content: String,
//!     turn_index: Int,
//!     timestamp: String,
//!     attachments: String,   // JSON array
//!     metadata: String?      // JSON object
//! })
//!
//! (:MemchatFile { id: String, user_id: String, doc: String })
//! (:MemchatSession { session_id: String, user_id: String, expires_at: String?, doc: String })
//!
//! (:MemchatChat)-[:HAS_MESSAGE]->(:MemchatMessage)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::{Graph, Node, query};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::models::{
    chat::{Chat, ChatMetadata, ChatStats, ChatSummary, DEFAULT_CHAT_TITLE, Role, Turn, TurnPair},
    file::FileRecord,
    session::Session,
};

use super::traits::{ChatStore, FileStore, SessionStore, StoreError, StoreResult};

#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// Shared, lazily connected Neo4j handle.
///
/// The first caller performs the connection while concurrent callers wait on
/// the same attempt. A failed attempt leaves the cell empty so a later request
/// can try again.
pub struct Neo4jClient {
    config: Neo4jConfig,
    graph: OnceCell<Graph>,
}

impl Neo4jClient {
    pub fn new(config: Neo4jConfig) -> Self {
        Self {
            config,
            graph: OnceCell::new(),
        }
    }

    pub async fn graph(&self) -> StoreResult<&Graph> {
        self.graph
            .get_or_try_init(|| async {
                info!("Connecting to Neo4j at {}", self.config.uri);
                let graph =
                    Graph::new(&self.config.uri, &self.config.user, &self.config.password)
                        .await
                        .map_err(|e| {
                            warn!("Neo4j connection failed: {}", e);
                            StoreError::from(e)
                        })?;
                init_schema(&graph).await;
                info!("Connected to Neo4j successfully");
                Ok(graph)
            })
            .await
    }
}

async fn init_schema(graph: &Graph) {
    let constraints = [
        "CREATE CONSTRAINT memchat_chat_id IF NOT EXISTS FOR (c:MemchatChat) REQUIRE c.id IS UNIQUE",
        "CREATE CONSTRAINT memchat_message_id IF NOT EXISTS FOR (m:MemchatMessage) REQUIRE m.id IS UNIQUE",
        "CREATE CONSTRAINT memchat_file_id IF NOT EXISTS FOR (f:MemchatFile) REQUIRE f.id IS UNIQUE",
        "CREATE CONSTRAINT memchat_session_id IF NOT EXISTS FOR (s:MemchatSession) REQUIRE s.session_id IS UNIQUE",
    ];

    for constraint in constraints {
        if let Err(e) = graph.run(query(constraint)).await {
            // Constraint might already exist
            debug!("Constraint creation result: {:?}", e);
        }
    }
}

// ============================================================================
// Neo4jChatStore
// ============================================================================

pub struct Neo4jChatStore {
    client: Arc<Neo4jClient>,
}

impl Neo4jChatStore {
    pub fn new(client: Arc<Neo4jClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatStore for Neo4jChatStore {
    async fn create(&self, chat: Chat) -> StoreResult<Chat> {
        let graph = self.client.graph().await?;

        let q = query(
            "CREATE (c:MemchatChat {
                id: $id,
                user_id: $user_id,
                title: $title,
                model: $model,
                total_tokens: $total_tokens,
                message_count: $message_count,
                created_at: $created_at,
                updated_at: $updated_at
            })",
        )
        .param("id", chat.id.clone())
        .param("user_id", chat.user_id.clone())
        .param("title", chat.title.clone())
        .param("model", chat.metadata.model.clone())
        .param("total_tokens", chat.metadata.total_tokens as i64)
        .param("message_count", chat.metadata.message_count as i64)
        .param("created_at", timestamp(chat.created_at))
        .param("updated_at", timestamp(chat.updated_at));

        graph.run(q).await?;
        info!("Created Neo4j chat {}", chat.id);
        Ok(chat)
    }

    async fn get(&self, chat_id: &str, user_id: &str) -> StoreResult<Option<Chat>> {
        let graph = self.client.graph().await?;

        let q = query(
            "MATCH (c:MemchatChat {id: $id, user_id: $user_id})
            OPTIONAL MATCH (c)-[:HAS_MESSAGE]->(m:MemchatMessage)
            WITH c, m ORDER BY m.turn_index
            WITH c, collect(m) as messages
            RETURN c, messages",
        )
        .param("id", chat_id)
        .param("user_id", user_id);

        let mut result = graph.execute(q).await?;

        if let Some(row) = result.next().await? {
            let chat_node: Node = row.get("c")?;
            let message_nodes: Vec<Node> = row.get("messages")?;

            let messages = message_nodes
                .iter()
                .map(turn_from_node)
                .collect::<StoreResult<Vec<_>>>()?;

            let summary = summary_from_node(&chat_node)?;
            let model: String = chat_node.get("model").unwrap_or_default();
            let total_tokens: i64 = chat_node.get("total_tokens").unwrap_or(0);

            return Ok(Some(Chat {
                id: summary.id,
                title: summary.title,
                user_id: user_id.to_string(),
                messages,
                metadata: ChatMetadata {
                    model,
                    total_tokens: total_tokens.max(0) as u64,
                    message_count: summary.message_count,
                },
                created_at: summary.created_at,
                updated_at: summary.updated_at,
            }));
        }

        Ok(None)
    }

    async fn append_turns(
        &self,
        chat_id: &str,
        user_id: &str,
        pair: TurnPair,
    ) -> StoreResult<()> {
        let graph = self.client.graph().await?;
        let now = timestamp(Utc::now());

        // Single statement, so the upsert and both message inserts commit together.
        let q = query(
            "MERGE (c:MemchatChat {id: $id})
            ON CREATE SET c.user_id = $user_id,
                c.title = $title,
                c.total_tokens = 0,
                c.message_count = 0,
                c.created_at = $now
            WITH c
            WHERE c.user_id = $user_id
            CREATE (u:MemchatMessage {
                id: $user_turn_id, role: $user_role, content: $user_content,
                turn_index: c.message_count, timestamp: $user_ts,
                attachments: $user_attachments, metadata: $user_metadata
            })
            CREATE (a:MemchatMessage {
                id: $assistant_turn_id, role: $assistant_role, content: $assistant_content,
                turn_index: c.message_count + 1, timestamp: $assistant_ts,
                attachments: $assistant_attachments, metadata: $assistant_metadata
            })
            CREATE (c)-[:HAS_MESSAGE]->(u)
            CREATE (c)-[:HAS_MESSAGE]->(a)
            SET c.message_count = c.message_count + 2,
                c.total_tokens = c.total_tokens + $tokens,
                c.model = $model,
                c.updated_at = $now
            RETURN c.id as id",
        )
        .param("id", chat_id)
        .param("user_id", user_id)
        .param("title", DEFAULT_CHAT_TITLE)
        .param("now", now)
        .param("tokens", pair.tokens as i64)
        .param("model", pair.model.clone());

        let q = bind_turn(q, "user", &pair.user)?;
        let q = bind_turn(q, "assistant", &pair.assistant)?;

        let mut result = graph.execute(q).await?;

        if result.next().await?.is_none() {
            return Err(StoreError::NotOwned(chat_id.to_string()));
        }

        debug!("Appended turn pair to chat {}", chat_id);
        Ok(())
    }

    async fn list(&self, user_id: &str, limit: usize) -> StoreResult<Vec<ChatSummary>> {
        let graph = self.client.graph().await?;

        let q = query(
            "MATCH (c:MemchatChat {user_id: $user_id})
            RETURN c
            ORDER BY c.updated_at DESC
            LIMIT $limit",
        )
        .param("user_id", user_id)
        .param("limit", limit as i64);

        let mut result = graph.execute(q).await?;
        let mut chats = Vec::new();

        while let Some(row) = result.next().await? {
            let node: Node = row.get("c")?;
            chats.push(summary_from_node(&node)?);
        }

        Ok(chats)
    }

    async fn rename(&self, chat_id: &str, user_id: &str, title: &str) -> StoreResult<()> {
        let graph = self.client.graph().await?;

        let q = query(
            "MATCH (c:MemchatChat {id: $id, user_id: $user_id})
            SET c.title = $title, c.updated_at = $now
            RETURN c.id as id",
        )
        .param("id", chat_id)
        .param("user_id", user_id)
        .param("title", title)
        .param("now", timestamp(Utc::now()));

        let mut result = graph.execute(q).await?;

        if result.next().await?.is_none() {
            return Err(StoreError::chat_not_found());
        }

        Ok(())
    }

    async fn remove(&self, chat_id: &str, user_id: &str) -> StoreResult<()> {
        let graph = self.client.graph().await?;

        let q = query(
            "MATCH (c:MemchatChat {id: $id, user_id: $user_id})
            OPTIONAL MATCH (c)-[:HAS_MESSAGE]->(m:MemchatMessage)
            DETACH DELETE c, m
            RETURN count(DISTINCT c) as deleted",
        )
        .param("id", chat_id)
        .param("user_id", user_id);

        let mut result = graph.execute(q).await?;

        let deleted: i64 = match result.next().await? {
            Some(row) => row.get("deleted")?,
            None => 0,
        };

        if deleted == 0 {
            return Err(StoreError::chat_not_found());
        }

        info!("Deleted Neo4j chat {}", chat_id);
        Ok(())
    }

    async fn cleanup_older_than(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let graph = self.client.graph().await?;

        let q = query(
            "MATCH (c:MemchatChat {user_id: $user_id})
            WHERE c.updated_at < $cutoff
            OPTIONAL MATCH (c)-[:HAS_MESSAGE]->(m:MemchatMessage)
            DETACH DELETE c, m
            RETURN count(DISTINCT c) as deleted",
        )
        .param("user_id", user_id)
        .param("cutoff", timestamp(cutoff));

        let mut result = graph.execute(q).await?;

        let deleted: i64 = match result.next().await? {
            Some(row) => row.get("deleted")?,
            None => 0,
        };

        if deleted > 0 {
            info!("Cleaned up {} old chats for user {}", deleted, user_id);
        }
        Ok(deleted.max(0) as u64)
    }

    async fn stats(&self, user_id: &str) -> StoreResult<ChatStats> {
        let graph = self.client.graph().await?;

        let q = query(
            "MATCH (c:MemchatChat {user_id: $user_id})
            RETURN count(c) as chats, coalesce(sum(c.message_count), 0) as messages",
        )
        .param("user_id", user_id);

        let mut result = graph.execute(q).await?;

        let (chats, messages): (i64, i64) = match result.next().await? {
            Some(row) => (row.get("chats")?, row.get("messages")?),
            None => (0, 0),
        };

        Ok(ChatStats {
            total_chats: chats.max(0) as u64,
            total_messages: messages.max(0) as u64,
            total_files: 0,
        })
    }
}

// ============================================================================
// Neo4jFileStore
// ============================================================================

pub struct Neo4jFileStore {
    client: Arc<Neo4jClient>,
}

impl Neo4jFileStore {
    pub fn new(client: Arc<Neo4jClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FileStore for Neo4jFileStore {
    async fn create(&self, file: FileRecord) -> StoreResult<FileRecord> {
        let graph = self.client.graph().await?;

        let q = query("CREATE (f:MemchatFile {id: $id, user_id: $user_id, doc: $doc})")
            .param("id", file.id.clone())
            .param("user_id", file.user_id.clone())
            .param("doc", serde_json::to_string(&file)?);

        graph.run(q).await?;
        Ok(file)
    }

    async fn get(&self, file_id: &str, user_id: &str) -> StoreResult<Option<FileRecord>> {
        let graph = self.client.graph().await?;

        let q = query(
            "MATCH (f:MemchatFile {id: $id, user_id: $user_id})
            RETURN f.doc as doc",
        )
        .param("id", file_id)
        .param("user_id", user_id);

        let mut result = graph.execute(q).await?;

        match result.next().await? {
            Some(row) => {
                let doc: String = row.get("doc")?;
                Ok(Some(serde_json::from_str(&doc)?))
            },
            None => Ok(None),
        }
    }

    async fn delete(&self, file_id: &str, user_id: &str) -> StoreResult<()> {
        let graph = self.client.graph().await?;

        let q = query(
            "MATCH (f:MemchatFile {id: $id, user_id: $user_id})
            DETACH DELETE f
            RETURN count(f) as deleted",
        )
        .param("id", file_id)
        .param("user_id", user_id);

        let mut result = graph.execute(q).await?;

        let deleted: i64 = match result.next().await? {
            Some(row) => row.get("deleted")?,
            None => 0,
        };

        if deleted == 0 {
            return Err(StoreError::file_not_found());
        }
        Ok(())
    }

    async fn count(&self, user_id: &str) -> StoreResult<u64> {
        let graph = self.client.graph().await?;

        let q = query("MATCH (f:MemchatFile {user_id: $user_id}) RETURN count(f) as files")
            .param("user_id", user_id);

        let mut result = graph.execute(q).await?;

        let files: i64 = match result.next().await? {
            Some(row) => row.get("files")?,
            None => 0,
        };
        Ok(files.max(0) as u64)
    }
}

// ============================================================================
// Neo4jSessionStore
// ============================================================================

pub struct Neo4jSessionStore {
    client: Arc<Neo4jClient>,
}

impl Neo4jSessionStore {
    pub fn new(client: Arc<Neo4jClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SessionStore for Neo4jSessionStore {
    async fn create(&self, session: Session) -> StoreResult<Session> {
        let graph = self.client.graph().await?;

        let q = query(
            "CREATE (s:MemchatSession {
                session_id: $session_id,
                user_id: $user_id,
                expires_at: $expires_at,
                doc: $doc
            })",
        )
        .param("session_id", session.session_id.clone())
        .param("user_id", session.user_id.clone())
        .param(
            "expires_at",
            session.expires_at.map(timestamp).unwrap_or_default(),
        )
        .param("doc", serde_json::to_string(&session)?);

        graph.run(q).await?;
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> StoreResult<Option<Session>> {
        let graph = self.client.graph().await?;

        let q = query("MATCH (s:MemchatSession {session_id: $session_id}) RETURN s.doc as doc")
            .param("session_id", session_id);

        let mut result = graph.execute(q).await?;

        match result.next().await? {
            Some(row) => {
                let doc: String = row.get("doc")?;
                Ok(Some(serde_json::from_str(&doc)?))
            },
            None => Ok(None),
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let graph = self.client.graph().await?;

        // An empty expires_at means the session never expires.
        let q = query(
            "MATCH (s:MemchatSession)
            WHERE s.expires_at <> '' AND s.expires_at < $now
            DETACH DELETE s
            RETURN count(s) as deleted",
        )
        .param("now", timestamp(now));

        let mut result = graph.execute(q).await?;

        let deleted: i64 = match result.next().await? {
            Some(row) => row.get("deleted")?,
            None => 0,
        };

        if deleted > 0 {
            info!("Removed {} expired sessions", deleted);
        }
        Ok(deleted.max(0) as u64)
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(node: &Node, field: &str) -> StoreResult<DateTime<Utc>> {
    let raw: String = node.get(field)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("invalid {field} timestamp: {e}")))
}

fn summary_from_node(node: &Node) -> StoreResult<ChatSummary> {
    let message_count: i64 = node.get("message_count").unwrap_or(0);

    Ok(ChatSummary {
        id: node.get("id")?,
        title: node.get("title").unwrap_or_else(|_| DEFAULT_CHAT_TITLE.to_string()),
        created_at: parse_timestamp(node, "created_at")?,
        updated_at: parse_timestamp(node, "updated_at")?,
        message_count: message_count.max(0) as u64,
    })
}

fn turn_from_node(node: &Node) -> StoreResult<Turn> {
    let role: String = node.get("role")?;
    let attachments: String = node.get("attachments").unwrap_or_else(|_| "[]".to_string());
    let metadata: String = node.get("metadata").unwrap_or_default();

    Ok(Turn {
        id: node.get("id")?,
        role: Role::parse(&role)
            .ok_or_else(|| StoreError::Backend(format!("unknown role {role}")))?,
        content: node.get("content").unwrap_or_default(),
        timestamp: parse_timestamp(node, "timestamp")?,
        attachments: serde_json::from_str(&attachments)?,
        metadata: if metadata.is_empty() {
            None
        } else {
            Some(serde_json::from_str(&metadata)?)
        },
    })
}

fn bind_turn(q: neo4rs::Query, prefix: &str, turn: &Turn) -> StoreResult<neo4rs::Query> {
    let metadata = match &turn.metadata {
        Some(metadata) => serde_json::to_string(metadata)?,
        None => String::new(),
    };

    Ok(q.param(&format!("{prefix}_turn_id"), turn.id.clone())
        .param(&format!("{prefix}_role"), turn.role.as_str())
        .param(&format!("{prefix}_content"), turn.content.clone())
        .param(&format!("{prefix}_ts"), timestamp(turn.timestamp))
        .param(
            &format!("{prefix}_attachments"),
            serde_json::to_string(&turn.attachments)?,
        )
        .param(&format!("{prefix}_metadata"), metadata))
}
