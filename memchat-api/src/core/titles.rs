use std::sync::Arc;
use tracing::{debug, warn};

use super::providers::ModelBackend;
use crate::models::{
    chat::{DEFAULT_CHAT_TITLE, Role},
    prompt::{GenerationRequest, PromptMessage},
};

/// Characters of the first message shown to the title backend.
const TITLE_SOURCE_CHARS: usize = 200;

/// Names new chats from their first message.
///
/// The backend is resolved once at startup; without one every chat gets the
/// default title.
#[derive(Clone)]
pub struct TitleGenerator {
    backend: Option<Arc<dyn ModelBackend>>,
    temperature: f32,
    max_tokens: u32,
}

impl TitleGenerator {
    pub fn new(backend: Option<Arc<dyn ModelBackend>>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            backend,
            temperature,
            max_tokens,
        }
    }

    pub async fn generate(&self, first_message: Option<&str>) -> String {
        let Some(message) = first_message.filter(|m| !m.trim().is_empty()) else {
            return DEFAULT_CHAT_TITLE.to_string();
        };
        let Some(backend) = &self.backend else {
            return DEFAULT_CHAT_TITLE.to_string();
        };

        let request = GenerationRequest {
            messages: vec![PromptMessage::text(Role::User, title_prompt(message))],
            temperature: self.temperature,
            max_output_tokens: self.max_tokens,
        };

        match backend.complete(&request).await {
            Ok(raw) => {
                let title = clean_title(&raw);
                if title.is_empty() {
                    DEFAULT_CHAT_TITLE.to_string()
                } else {
                    debug!(provider = %backend.provider(), title = %title, "generated chat title");
                    title
                }
            },
            Err(e) => {
                warn!(error = %e, "title generation failed, using default");
                DEFAULT_CHAT_TITLE.to_string()
            },
        }
    }
}

fn title_prompt(message: &str) -> String {
    let excerpt: String = message.chars().take(TITLE_SOURCE_CHARS).collect();
    format!("Generate a short, descriptive title (max 6 words) for this conversation: \"{excerpt}...\"")
}

fn clean_title(raw: &str) -> String {
    raw.replace(['"', '\''], "").trim().to_string()
}
