//! OpenAI chat-completions streaming, also used for Mistral which speaks the
//! same wire format.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    BackendError, EventStream, ModelBackend, Provider, check_status, decode_error, sse_events,
    transport,
};
use crate::models::prompt::{BackendEvent, GenerationRequest, PromptMessage, PromptPart, TokenUsage};

pub struct OpenAiCompatibleBackend {
    provider: Provider,
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        provider: Provider,
        model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    fn request_body(&self, request: &GenerationRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(message_json).collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
            "stream": true,
        });

        // Mistral rejects unknown fields, OpenAI needs this to report usage.
        if self.provider == Provider::OpenAi {
            body["stream_options"] = json!({ "include_usage": true });
        }

        body
    }
}

fn message_json(message: &PromptMessage) -> Value {
    if !message.has_images() {
        return json!({
            "role": message.role.as_str(),
            "content": message.text_content(),
        });
    }

    let parts: Vec<Value> = message
        .parts
        .iter()
        .map(|part| match part {
            PromptPart::Text(text) => json!({ "type": "text", "text": text }),
            PromptPart::ImageUrl { url, .. } => {
                json!({ "type": "image_url", "image_url": { "url": url } })
            },
        })
        .collect();

    json!({ "role": message.role.as_str(), "content": parts })
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

pub(crate) fn parse_chunk(provider: Provider, data: &str) -> Result<Vec<BackendEvent>, BackendError> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(Vec::new());
    }

    let chunk: Chunk = serde_json::from_str(data).map_err(decode_error(provider))?;
    let mut events = Vec::new();

    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(content) = choice.delta.content
            && !content.is_empty()
        {
            events.push(BackendEvent::Delta(content));
        }
        if let Some(reason) = choice.finish_reason {
            events.push(BackendEvent::Finish(reason));
        }
    }

    if let Some(usage) = chunk.usage {
        events.push(BackendEvent::Usage(TokenUsage::new(
            usage.prompt_tokens,
            usage.completion_tokens,
        )));
    }

    Ok(events)
}

#[async_trait]
impl ModelBackend for OpenAiCompatibleBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, BackendError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(transport(self.provider))?;

        let response = check_status(self.provider, response).await?;
        let provider = self.provider;

        Ok(sse_events(provider, response, move |_, data| {
            parse_chunk(provider, data)
        }))
    }
}
