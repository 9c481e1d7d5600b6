use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A durable, user-scoped fact held by the external memory service.
///
/// `score` is only present on search results and only meaningful relative to
/// the query that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    #[serde(default)]
    pub memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySearchResponse {
    pub results: Vec<MemoryRecord>,
    pub total: u64,
}

impl MemorySearchResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_records(results: Vec<MemoryRecord>) -> Self {
        let total = results.len() as u64;
        Self { results, total }
    }
}

/// A message handed to the memory service when capturing a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub role: String,
    pub content: String,
}
