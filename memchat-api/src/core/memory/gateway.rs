use chrono::Utc;
use reqwest::Method;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::models::{
    chat::Role,
    memory::{MemoryMessage, MemoryRecord, MemorySearchResponse},
};

/// Value of the `source` metadata field on every captured memory.
const MEMORY_SOURCE: &str = "memchat";

/// Thin client for the memory service.
///
/// No method returns an error: listings degrade to an empty response and
/// mutations to `None`, with the cause logged.
#[derive(Clone)]
pub struct MemoryGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl MemoryGateway {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub async fn add(
        &self,
        messages: Vec<MemoryMessage>,
        user_id: &str,
        metadata: Map<String, Value>,
    ) -> Option<Value> {
        let mut merged = Map::new();
        merged.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        merged.insert("source".into(), json!(MEMORY_SOURCE));
        merged.extend(metadata);

        let body = json!({
            "messages": messages,
            "user_id": user_id,
            "metadata": merged,
        });

        self.send("add", Method::POST, "/v1/memories/", Some(body), &[])
            .await
    }

    pub async fn search(&self, query: &str, user_id: &str, limit: usize) -> MemorySearchResponse {
        let body = json!({ "query": query, "user_id": user_id, "limit": limit });

        match self
            .send("search", Method::POST, "/v1/memories/search/", Some(body), &[])
            .await
        {
            Some(value) => parse_listing(value),
            None => MemorySearchResponse::empty(),
        }
    }

    pub async fn get_all(&self, user_id: &str, limit: usize) -> MemorySearchResponse {
        let limit = limit.to_string();
        let query = [("user_id", user_id), ("limit", limit.as_str())];

        match self
            .send("list", Method::GET, "/v1/memories/", None, &query)
            .await
        {
            Some(value) => parse_listing(value),
            None => MemorySearchResponse::empty(),
        }
    }

    pub async fn update(&self, memory_id: &str, user_id: &str, memory: &str) -> Option<Value> {
        let body = json!({ "memory": memory, "user_id": user_id });
        let path = format!("/v1/memories/{memory_id}/");

        self.send("update", Method::PUT, &path, Some(body), &[]).await
    }

    pub async fn delete(&self, memory_id: &str, user_id: &str) -> Option<Value> {
        let body = json!({ "user_id": user_id });
        let path = format!("/v1/memories/{memory_id}/");

        self.send("delete", Method::DELETE, &path, Some(body), &[])
            .await
    }

    /// Stores the tail of a conversation, tagged with its chat id.
    pub async fn capture_conversation(
        &self,
        messages: &[MemoryMessage],
        user_id: &str,
        chat_id: Option<&str>,
        window: usize,
        extra: Map<String, Value>,
    ) -> Option<Value> {
        let mut metadata = Map::new();
        metadata.insert("chatId".into(), json!(chat_id.unwrap_or("temp")));
        metadata.insert("messageCount".into(), json!(messages.len()));
        metadata.extend(extra);

        self.add(conversation_window(messages, window), user_id, metadata)
            .await
    }

    async fn send(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
        query: &[(&str, &str)],
    ) -> Option<Value> {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key);

        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(operation, error = %e, "memory service unreachable");
                return None;
            },
        };

        let status = response.status();
        if !status.is_success() {
            warn!(operation, status = status.as_u16(), "memory service rejected request");
            return None;
        }

        match response.json::<Value>().await {
            Ok(value) => {
                debug!(operation, "memory service call succeeded");
                Some(value)
            },
            // Some endpoints answer 204 or an empty body.
            Err(_) => Some(Value::Null),
        }
    }
}

/// The last `window` non-system messages, oldest first.
pub fn conversation_window(messages: &[MemoryMessage], window: usize) -> Vec<MemoryMessage> {
    let relevant: Vec<&MemoryMessage> = messages
        .iter()
        .filter(|m| m.role != Role::System.as_str())
        .collect();

    let skip = relevant.len().saturating_sub(window);
    relevant.into_iter().skip(skip).cloned().collect()
}

/// Accepts `{results|memories: [...], total}` or a bare array. Records that
/// do not decode are skipped.
fn parse_listing(value: Value) -> MemorySearchResponse {
    let (items, total) = match value {
        Value::Array(items) => (items, None),
        Value::Object(mut object) => {
            let items = object
                .remove("results")
                .or_else(|| object.remove("memories"))
                .and_then(|v| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
                .unwrap_or_default();
            (items, object.get("total").and_then(Value::as_u64))
        },
        _ => (Vec::new(), None),
    };

    let records: Vec<MemoryRecord> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();

    match total {
        Some(total) => MemorySearchResponse {
            total: total.max(records.len() as u64),
            results: records,
        },
        None => MemorySearchResponse::from_records(records),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message(role: &str, content: &str) -> MemoryMessage {
        MemoryMessage {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_search_posts_query_and_parses_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/memories/search/"))
            .and(header("authorization", "Bearer mem-key"))
            .and(body_partial_json(json!({ "query": "tea", "user_id": "alice", "limit": 5 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "id": "m1", "memory": "Prefers green tea", "score": 0.91 },
                    { "id": "m2", "memory": "Lives in Lyon", "score": 0.42 }
                ],
                "total": 2
            })))
            .mount(&server)
            .await;

        let gateway = MemoryGateway::new(reqwest::Client::new(), &server.uri(), "mem-key");
        let response = gateway.search("tea", "alice", 5).await;

        assert_eq!(response.total, 2);
        assert_eq!(response.results[0].memory, "Prefers green tea");
        assert_eq!(response.results[1].score, Some(0.42));
    }

    #[tokio::test]
    async fn test_network_failure_degrades_to_empty() {
        // Nothing listens on port 9 of localhost.
        let gateway = MemoryGateway::new(reqwest::Client::new(), "http://127.0.0.1:9", "k");

        assert_eq!(gateway.search("q", "alice", 5).await, MemorySearchResponse::empty());
        assert_eq!(gateway.get_all("alice", 10).await, MemorySearchResponse::empty());
        assert!(gateway.delete("m1", "alice").await.is_none());
        assert!(gateway.update("m1", "alice", "x").await.is_none());
    }

    #[tokio::test]
    async fn test_error_status_degrades_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gateway = MemoryGateway::new(reqwest::Client::new(), &server.uri(), "k");
        assert!(gateway.delete("missing", "alice").await.is_none());
    }

    #[tokio::test]
    async fn test_get_all_accepts_bare_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/memories/"))
            .and(query_param("user_id", "alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "m1", "memory": "one" },
                { "id": "m2", "memory": "two" },
                { "unexpected": true }
            ])))
            .mount(&server)
            .await;

        let gateway = MemoryGateway::new(reqwest::Client::new(), &server.uri(), "k");
        let listing = gateway.get_all("alice", 10).await;

        assert_eq!(listing.total, 2);
        assert_eq!(listing.results.len(), 2);
    }

    #[tokio::test]
    async fn test_capture_sends_window_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/memories/"))
            .and(body_partial_json(json!({
                "user_id": "alice",
                "metadata": { "chatId": "temp", "source": "memchat", "messageCount": 3 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "new" }])))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = MemoryGateway::new(reqwest::Client::new(), &server.uri(), "k");
        let result = gateway
            .capture_conversation(
                &[
                    message("system", "rules"),
                    message("user", "hi"),
                    message("assistant", "hello"),
                ],
                "alice",
                None,
                10,
                Map::new(),
            )
            .await;

        assert!(result.is_some());
    }

    #[test]
    fn test_window_drops_system_and_keeps_tail() {
        let messages: Vec<_> = (0..12)
            .map(|i| message(if i % 2 == 0 { "user" } else { "assistant" }, &i.to_string()))
            .chain(std::iter::once(message("system", "ignored")))
            .collect();

        let window = conversation_window(&messages, 10);
        assert_eq!(window.len(), 10);
        assert_eq!(window[0].content, "2");
        assert_eq!(window[9].content, "11");
    }
}
