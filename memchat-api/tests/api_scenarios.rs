//! End-to-end scenarios against the real router with in-memory stores.
//! Model providers are simulated with wiremock; the memory service points at
//! a closed port so every memory call degrades to its empty result.

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::{TestResponse, TestServer};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use std::time::Duration as StdDuration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use memchat_api::{
    AppState,
    core::{config::Settings, model_router::ProviderCredentials, providers::Provider},
    create_router,
    models::chat::Chat,
};

const UNREACHABLE: &str = "http://127.0.0.1:9";

struct Harness {
    server: TestServer,
    state: AppState,
}

impl Harness {
    fn new(openai_url: Option<String>) -> Self {
        let mut settings = Settings::default_settings().unwrap();
        settings.memory.base_url = UNREACHABLE.to_string();
        settings.uploads.uploadcare_base_url = UNREACHABLE.to_string();
        settings.uploads.cloudinary_base_url = UNREACHABLE.to_string();

        let credentials = match openai_url {
            Some(url) => {
                settings.providers.openai_base_url = Some(url);
                ProviderCredentials::default().with(Provider::OpenAi, "test-key")
            },
            None => ProviderCredentials::default(),
        };

        let state = AppState::build(settings, credentials);
        let server = TestServer::new(create_router(state.clone())).unwrap();
        Self { server, state }
    }

    fn bearer(&self, user_id: &str) -> HeaderValue {
        let token = self.state.auth.generate_token(user_id, 1).unwrap();
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
    }

    async fn get(&self, user_id: &str, uri: &str) -> TestResponse {
        self.server
            .get(uri)
            .add_header(header::AUTHORIZATION, self.bearer(user_id))
            .await
    }

    async fn post(&self, user_id: &str, uri: &str, body: Value) -> TestResponse {
        self.server
            .post(uri)
            .add_header(header::AUTHORIZATION, self.bearer(user_id))
            .json(&body)
            .await
    }

    async fn patch(&self, user_id: &str, uri: &str, body: Value) -> TestResponse {
        self.server
            .patch(uri)
            .add_header(header::AUTHORIZATION, self.bearer(user_id))
            .json(&body)
            .await
    }

    async fn delete(&self, user_id: &str, uri: &str) -> TestResponse {
        self.server
            .delete(uri)
            .add_header(header::AUTHORIZATION, self.bearer(user_id))
            .await
    }

    /// Persistence runs after the body ends, so poll for it.
    async fn wait_for_chat(&self, chat_id: &str, user_id: &str) -> Chat {
        for _ in 0..100 {
            if let Some(chat) = self.state.chats.get(chat_id, user_id).await.unwrap() {
                return chat;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        panic!("chat {chat_id} was never persisted");
    }
}

fn sse(chunks: &[&str]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({ "choices": [{ "delta": { "content": chunk } }] })
        ));
    }
    body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":20,\"completion_tokens\":5,\"total_tokens\":25}}\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}

fn sse_response(chunks: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(sse(chunks))
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let harness = Harness::new(None);
    harness.server.get("/health").await.assert_text("OK");
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let harness = Harness::new(None);

    harness
        .server
        .get("/chat/history")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    harness
        .server
        .get("/chat/history")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_new_chat_gets_generated_title() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("max 6 words"))
        .respond_with(sse_response(&["\"Friendly ", "Greeting\""]))
        .mount(&provider)
        .await;

    let harness = Harness::new(Some(provider.uri()));
    let response = harness
        .post("alice", "/chat/new", json!({ "firstMessage": "hello" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    let chat_id = body["chatId"].as_str().unwrap();
    assert!(chat_id.starts_with("chat_"));
    assert_eq!(body["title"], "Friendly Greeting");

    let chat = harness.get("alice", &format!("/chat/{chat_id}")).await;
    chat.assert_status_ok();
    assert_eq!(chat.json::<Value>()["chat"]["metadata"]["messageCount"], 0);
}

#[tokio::test]
async fn test_new_chat_falls_back_when_titles_fail() {
    let harness = Harness::new(None);
    let response = harness
        .post("alice", "/chat/new", json!({ "firstMessage": "hello" }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert!(!body["chatId"].as_str().unwrap().is_empty());
    assert_eq!(body["title"], "New Chat");
}

#[tokio::test]
async fn test_chat_streams_despite_failed_document_extraction() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("report.pdf (application/pdf)"))
        .respond_with(sse_response(&["The report ", "could not be read."]))
        .expect(1)
        .mount(&provider)
        .await;

    let harness = Harness::new(Some(provider.uri()));
    let response = harness
        .post(
            "alice",
            "/chat",
            json!({
                "messages": [{ "id": "m1", "role": "user", "content": "Summarize the report" }],
                "attachments": [{
                    "id": "file_1",
                    "name": "report.pdf",
                    "type": "application/pdf",
                    "size": 2048,
                    "url": format!("{UNREACHABLE}/report.pdf")
                }]
            }),
        )
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), "The report could not be read.");
    let chat_id = response.header("x-chat-id").to_str().unwrap().to_string();
    assert!(chat_id.starts_with("chat_"));

    let chat = harness.wait_for_chat(&chat_id, "alice").await;
    assert_eq!(chat.title, "New Chat");
    assert_eq!(chat.metadata.message_count, 2);
    assert_eq!(chat.metadata.total_tokens, 25);
    assert_eq!(chat.messages[0].content, "Summarize the report");
    assert_eq!(chat.messages[0].attachments[0].name, "report.pdf");
    assert_eq!(chat.messages[1].content, "The report could not be read.");
}

#[tokio::test]
async fn test_chat_appends_to_existing_chat() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&["ok"]))
        .mount(&provider)
        .await;

    let harness = Harness::new(Some(provider.uri()));
    let created: Value = harness.post("alice", "/chat/new", json!({})).await.json();
    let chat_id = created["chatId"].as_str().unwrap();

    let response = harness
        .post(
            "alice",
            "/chat",
            json!({ "chatId": chat_id, "messages": [{ "role": "user", "content": "hi" }] }),
        )
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("x-chat-id"), chat_id);

    for _ in 0..100 {
        let chat = harness.wait_for_chat(chat_id, "alice").await;
        if chat.metadata.message_count == 2 {
            assert_eq!(chat.messages[1].content, "ok");
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    panic!("turn pair was never appended");
}

#[tokio::test]
async fn test_chat_rejects_empty_messages() {
    let harness = Harness::new(None);
    harness
        .post("alice", "/chat", json!({ "messages": [] }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_with_header_unsafe_id_persists_nothing() {
    let provider = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&["never ", "sent"]))
        .expect(0)
        .mount(&provider)
        .await;
    let harness = Harness::new(Some(provider.uri()));

    let response = harness
        .post(
            "alice",
            "/chat",
            json!({
                "chatId": "bad\nid",
                "messages": [{ "role": "user", "content": "hi" }],
            }),
        )
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_text("Invalid chat id");

    tokio::time::sleep(StdDuration::from_millis(100)).await;
    assert!(harness.state.chats.get("bad\nid", "alice").await.unwrap().is_none());
    assert!(harness.state.chats.list("alice", 50).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_without_provider_is_server_error() {
    let harness = Harness::new(None);
    let response = harness
        .post("alice", "/chat", json!({ "messages": [{ "role": "user", "content": "hi" }] }))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    response.assert_text("Internal Server Error");
}

#[tokio::test]
async fn test_foreign_chat_cannot_be_renamed_or_deleted() {
    let harness = Harness::new(None);
    let created: Value = harness.post("alice", "/chat/new", json!({})).await.json();
    let uri = format!("/chat/{}", created["chatId"].as_str().unwrap());

    harness
        .patch("bob", &uri, json!({ "title": "Mine now" }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    harness
        .delete("bob", &uri)
        .await
        .assert_status(StatusCode::NOT_FOUND);
    harness
        .get("bob", &uri)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    harness
        .patch("alice", &uri, json!({ "title": "Renamed" }))
        .await
        .assert_status_ok();
    let chat: Value = harness.get("alice", &uri).await.json();
    assert_eq!(chat["chat"]["title"], "Renamed");

    harness.delete("alice", &uri).await.assert_status_ok();
    harness
        .delete("alice", &uri)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_history_lists_only_own_chats_newest_first() {
    let harness = Harness::new(None);
    let first: Value = harness.post("alice", "/chat/new", json!({})).await.json();
    tokio::time::sleep(StdDuration::from_millis(5)).await;
    let second: Value = harness.post("alice", "/chat/new", json!({})).await.json();
    harness.post("bob", "/chat/new", json!({})).await.assert_status_ok();

    let history: Value = harness.get("alice", "/chat/history").await.json();
    let ids: Vec<&str> = history["chats"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();

    assert_eq!(ids, vec![second["chatId"].as_str().unwrap(), first["chatId"].as_str().unwrap()]);
}

#[tokio::test]
async fn test_cleanup_removes_only_chats_older_than_cutoff() {
    let harness = Harness::new(None);
    let now = Utc::now();

    for (id, owner, age_days) in [
        ("stale", "alice", 91),
        ("recent", "alice", 89),
        ("foreign_stale", "bob", 120),
    ] {
        let mut chat = Chat::new(id.into(), "t".into(), owner.into());
        chat.updated_at = now - Duration::days(age_days);
        harness.state.chats.create(chat).await.unwrap();
    }

    let response = harness
        .post("alice", "/admin/cleanup", json!({ "action": "cleanup_old_chats", "daysOld": 90 }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["deletedCount"], 1);
    assert_eq!(body["action"], "cleanup_old_chats");

    let chats = &harness.state.chats;
    assert!(chats.get("stale", "alice").await.unwrap().is_none());
    assert!(chats.get("recent", "alice").await.unwrap().is_some());
    assert!(chats.get("foreign_stale", "bob").await.unwrap().is_some());
}

#[tokio::test]
async fn test_cleanup_rejects_unknown_action() {
    let harness = Harness::new(None);
    let response = harness
        .post("alice", "/admin/cleanup", json!({ "action": "drop_everything" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_text("Invalid action");
}

#[tokio::test]
async fn test_cleanup_rejects_out_of_range_age() {
    let harness = Harness::new(None);
    let mut chat = Chat::new("kept".into(), "t".into(), "alice".into());
    chat.updated_at = Utc::now() - Duration::days(400);
    harness.state.chats.create(chat).await.unwrap();

    let response = harness
        .post(
            "alice",
            "/admin/cleanup",
            json!({ "action": "cleanup_old_chats", "daysOld": 9_000_000_000_000_000_i64 }),
        )
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_text("daysOld out of range");
    assert!(harness.state.chats.get("kept", "alice").await.unwrap().is_some());
}

#[tokio::test]
async fn test_db_stats_counts_callers_chats() {
    let harness = Harness::new(None);
    harness.post("alice", "/chat/new", json!({})).await.assert_status_ok();
    harness.post("alice", "/chat/new", json!({})).await.assert_status_ok();

    let body: Value = harness.get("alice", "/admin/db-stats").await.json();
    assert_eq!(body["stats"]["totalChats"], 2);
    assert_eq!(body["stats"]["totalMessages"], 0);
    assert_eq!(body["stats"]["totalFiles"], 0);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_memory_listing_degrades_when_service_is_down() {
    let harness = Harness::new(None);

    let body: Value = harness.get("alice", "/memory?query=tea").await.json();
    assert_eq!(body, json!({ "results": [], "total": 0 }));

    harness
        .post("alice", "/memory", json!({ "action": "unknown" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    harness
        .server
        .put("/memory/m1")
        .add_header(header::AUTHORIZATION, harness.bearer("alice"))
        .json(&json!({ "memory": "  " }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_without_reference_is_bad_request() {
    let harness = Harness::new(None);
    let response = harness.post("alice", "/files/upload", json!({ "chatId": "c1" })).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_text("Missing uploadcare UUID");

    harness
        .delete("alice", "/files/file_missing")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
