use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    BackendError, EventStream, ModelBackend, Provider, check_status, decode_error, sse_events,
    transport,
};
use crate::models::prompt::{BackendEvent, GenerationRequest, TokenUsage};

/// Cohere v2 chat. Text only: image parts are never routed here.
pub struct CohereBackend {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl CohereBackend {
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
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.text_content() }))
            .collect();

        json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
            "stream": true,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum StreamFrame {
    ContentDelta {
        delta: ContentDelta,
    },
    MessageEnd {
        delta: EndDelta,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ContentDelta {
    message: DeltaMessage,
}

#[derive(Debug, Deserialize)]
struct DeltaMessage {
    content: DeltaContent,
}

#[derive(Debug, Deserialize)]
struct DeltaContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct EndDelta {
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    usage: Option<EndUsage>,
}

#[derive(Debug, Deserialize)]
struct EndUsage {
    #[serde(default)]
    billed_units: Option<BilledUnits>,
}

#[derive(Debug, Deserialize)]
struct BilledUnits {
    #[serde(default)]
    input_tokens: f64,
    #[serde(default)]
    output_tokens: f64,
}

pub(crate) fn parse_frame(data: &str) -> Result<Vec<BackendEvent>, BackendError> {
    let frame: StreamFrame = serde_json::from_str(data).map_err(decode_error(Provider::Cohere))?;

    let events = match frame {
        StreamFrame::ContentDelta { delta } if !delta.message.content.text.is_empty() => {
            vec![BackendEvent::Delta(delta.message.content.text)]
        },
        StreamFrame::MessageEnd { delta } => {
            let mut events = Vec::new();
            if let Some(units) = delta.usage.and_then(|u| u.billed_units) {
                events.push(BackendEvent::Usage(TokenUsage::new(
                    units.input_tokens as u64,
                    units.output_tokens as u64,
                )));
            }
            if let Some(reason) = delta.finish_reason {
                events.push(BackendEvent::Finish(reason.to_ascii_lowercase()));
            }
            events
        },
        _ => Vec::new(),
    };

    Ok(events)
}

#[async_trait]
impl ModelBackend for CohereBackend {
    fn provider(&self) -> Provider {
        Provider::Cohere
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, BackendError> {
        let response = self
            .client
            .post(format!("{}/chat", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(transport(Provider::Cohere))?;

        let response = check_status(Provider::Cohere, response).await?;

        Ok(sse_events(Provider::Cohere, response, |_, data| {
            parse_frame(data)
        }))
    }
}
