use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    BackendError, EventStream, ModelBackend, Provider, check_status, decode_error, sse_events,
    transport,
};
use crate::models::{
    chat::Role,
    prompt::{BackendEvent, GenerationRequest, PromptMessage, PromptPart, TokenUsage},
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
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

    fn request_body(&self, request: &GenerationRequest) -> Value {
        // System entries go to the top-level field; the rest keep their order.
        let system: Vec<String> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(PromptMessage::text_content)
            .collect();

        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(message_json)
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_output_tokens,
            "temperature": request.temperature,
            "stream": true,
        });

        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }

        body
    }
}

fn message_json(message: &PromptMessage) -> Value {
    let content: Vec<Value> = message
        .parts
        .iter()
        .map(|part| match part {
            PromptPart::Text(text) => json!({ "type": "text", "text": text }),
            PromptPart::ImageUrl { url, .. } => json!({
                "type": "image",
                "source": { "type": "url", "url": url },
            }),
        })
        .collect();

    json!({ "role": message.role.as_str(), "content": content })
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamFrame {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<OutputUsage>,
    },
    Error {
        error: ErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: Option<InputUsage>,
}

#[derive(Debug, Deserialize)]
struct InputUsage {
    #[serde(default)]
    input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OutputUsage {
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

pub(crate) fn parse_frame(data: &str) -> Result<Vec<BackendEvent>, BackendError> {
    let provider = Provider::Anthropic;
    let frame: StreamFrame = serde_json::from_str(data).map_err(decode_error(provider))?;

    let events = match frame {
        StreamFrame::MessageStart { message } => message
            .usage
            .map(|u| vec![BackendEvent::Usage(TokenUsage::new(u.input_tokens, 0))])
            .unwrap_or_default(),
        StreamFrame::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        } => vec![BackendEvent::Delta(text)],
        StreamFrame::ContentBlockDelta { .. } => Vec::new(),
        StreamFrame::MessageDelta { delta, usage } => {
            let mut events = Vec::new();
            if let Some(usage) = usage {
                events.push(BackendEvent::Usage(TokenUsage::new(0, usage.output_tokens)));
            }
            if let Some(reason) = delta.stop_reason {
                events.push(BackendEvent::Finish(reason));
            }
            events
        },
        StreamFrame::Error { error } => {
            return Err(BackendError::Remote {
                provider,
                message: error.message,
            });
        },
        StreamFrame::Other => Vec::new(),
    };

    Ok(events)
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, BackendError> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(transport(Provider::Anthropic))?;

        let response = check_status(Provider::Anthropic, response).await?;

        Ok(sse_events(Provider::Anthropic, response, |_, data| {
            parse_frame(data)
        }))
    }
}
