use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use super::{
    BackendError, EventStream, ModelBackend, Provider, check_status, decode_error, sse_events,
    transport,
};
use crate::models::{
    chat::Role,
    prompt::{BackendEvent, GenerationRequest, PromptPart, TokenUsage},
};

pub struct GeminiBackend {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(
        model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Gemini only accepts inline image bytes, so referenced images are
    /// downloaded here. An image that cannot be fetched is dropped.
    async fn inline_image(&self, url: &str, media_type: &str) -> Option<Value> {
        let response = match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(url, status = response.status().as_u16(), "image fetch rejected");
                return None;
            },
            Err(e) => {
                warn!(url, error = %e, "image fetch failed");
                return None;
            },
        };

        let bytes = response.bytes().await.ok()?;
        Some(json!({
            "inline_data": { "mime_type": media_type, "data": STANDARD.encode(&bytes) }
        }))
    }

    async fn request_body(&self, request: &GenerationRequest) -> Value {
        let mut system = Vec::new();
        let mut contents = Vec::new();

        for message in &request.messages {
            if message.role == Role::System {
                system.push(message.text_content());
                continue;
            }

            let mut parts = Vec::new();
            for part in &message.parts {
                match part {
                    PromptPart::Text(text) => parts.push(json!({ "text": text })),
                    PromptPart::ImageUrl { url, media_type } => {
                        if let Some(inline) = self.inline_image(url, media_type).await {
                            parts.push(inline);
                        }
                    },
                }
            }

            let role = if message.role == Role::Assistant { "model" } else { "user" };
            contents.push(json!({ "role": role, "parts": parts }));
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_output_tokens,
            },
        });

        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
        }

        body
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Chunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

pub(crate) fn parse_chunk(data: &str) -> Result<Vec<BackendEvent>, BackendError> {
    let chunk: Chunk = serde_json::from_str(data).map_err(decode_error(Provider::Google))?;
    let mut events = Vec::new();

    if let Some(candidate) = chunk.candidates.into_iter().next() {
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if !text.is_empty() {
            events.push(BackendEvent::Delta(text));
        }
        if let Some(reason) = candidate.finish_reason {
            events.push(BackendEvent::Finish(reason.to_ascii_lowercase()));
        }
    }

    if let Some(usage) = chunk.usage_metadata {
        events.push(BackendEvent::Usage(TokenUsage::new(
            usage.prompt_token_count,
            usage.candidates_token_count,
        )));
    }

    Ok(events)
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, BackendError> {
        let body = self.request_body(request).await;

        let response = self
            .client
            .post(format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.base_url, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport(Provider::Google))?;

        let response = check_status(Provider::Google, response).await?;

        Ok(sse_events(Provider::Google, response, |_, data| {
            parse_chunk(data)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::prompt::PromptMessage;

    #[test]
    fn test_parse_text_finish_and_usage() {
        let events = parse_chunk(
            r#"{"candidates":[{"content":{"parts":[{"text":"Bon"},{"text":"jour"}],"role":"model"},"finishReason":"STOP"}],
                "usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":2,"totalTokenCount":6}}"#,
        )
        .unwrap();

        assert_eq!(
            events,
            vec![
                BackendEvent::Delta("Bonjour".into()),
                BackendEvent::Finish("stop".into()),
                BackendEvent::Usage(TokenUsage::new(4, 2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_roles_are_mapped_and_system_lifted() {
        let backend = GeminiBackend::new("gemini-1.5-pro-latest", "http://x", "k", reqwest::Client::new());
        let request = GenerationRequest {
            messages: vec![
                PromptMessage::text(Role::User, "hi"),
                PromptMessage::text(Role::Assistant, "hello"),
                PromptMessage::text(Role::System, "be brief"),
            ],
            temperature: 0.3,
            max_output_tokens: 20,
        };

        let body = backend.request_body(&request).await;
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 20);
    }
}
