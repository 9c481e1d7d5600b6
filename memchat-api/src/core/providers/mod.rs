//! Language-model backends.
//!
//! Each backend turns a provider-neutral [`GenerationRequest`] into the
//! provider's streaming HTTP call and normalizes the server-sent events into
//! [`BackendEvent`]s.

pub mod anthropic;
pub mod cohere;
pub mod gemini;
pub mod openai;

use async_stream::try_stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;

use crate::models::prompt::{BackendEvent, GenerationRequest};

pub use anthropic::AnthropicBackend;
pub use cohere::CohereBackend;
pub use gemini::GeminiBackend;
pub use openai::OpenAiCompatibleBackend;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<BackendEvent, BackendError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{provider} request failed: {message}")]
    Transport { provider: Provider, message: String },

    #[error("{provider} returned status {status}: {body}")]
    Status {
        provider: Provider,
        status: u16,
        body: String,
    },

    #[error("{provider} sent a malformed event: {message}")]
    Decode { provider: Provider, message: String },

    #[error("{provider} reported an error: {message}")]
    Remote { provider: Provider, message: String },
}

/// The model providers the router knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Cohere,
    Google,
    Mistral,
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Cohere => "cohere",
            Provider::Google => "google",
            Provider::Mistral => "mistral",
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }

    /// Environment variable holding the provider's API key.
    pub fn credential_env(&self) -> &'static str {
        match self {
            Provider::Cohere => "COHERE_API_KEY",
            Provider::Google => "GOOGLE_GENERATIVE_AI_API_KEY",
            Provider::Mistral => "MISTRAL_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Cohere => "https://api.cohere.com/v2",
            Provider::Google => "https://generativelanguage.googleapis.com/v1beta",
            Provider::Mistral => "https://api.mistral.ai/v1",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com/v1",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    /// Starts a streaming generation. Errors before the first byte are
    /// returned directly; later failures arrive as stream items.
    async fn stream(&self, request: &GenerationRequest) -> Result<EventStream, BackendError>;

    /// Runs a generation to completion and returns the concatenated text.
    async fn complete(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let mut events = self.stream(request).await?;
        let mut text = String::new();

        while let Some(event) = events.next().await {
            if let BackendEvent::Delta(delta) = event? {
                text.push_str(&delta);
            }
        }

        Ok(text)
    }
}

/// Returns the response when its status is a success, otherwise the body as
/// a `Status` error.
pub(crate) async fn check_status(
    provider: Provider,
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        provider,
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn transport(provider: Provider) -> impl Fn(reqwest::Error) -> BackendError {
    move |e| BackendError::Transport {
        provider,
        message: e.to_string(),
    }
}

/// Adapts an SSE response body into normalized backend events.
///
/// `parse` receives the SSE event name (empty when absent) and data payload
/// and may yield any number of events for one frame.
pub(crate) fn sse_events<F>(
    provider: Provider,
    response: reqwest::Response,
    mut parse: F,
) -> EventStream
where
    F: FnMut(&str, &str) -> Result<Vec<BackendEvent>, BackendError> + Send + 'static,
{
    let mut frames = response.bytes_stream().eventsource();

    Box::pin(try_stream! {
        while let Some(frame) = frames.next().await {
            let frame = frame.map_err(|e| BackendError::Transport {
                provider,
                message: e.to_string(),
            })?;

            for event in parse(&frame.event, &frame.data)? {
                yield event;
            }
        }
    })
}

pub(crate) fn decode_error(provider: Provider) -> impl Fn(serde_json::Error) -> BackendError {
    move |e| BackendError::Decode {
        provider,
        message: e.to_string(),
    }
}
