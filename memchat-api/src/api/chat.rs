use axum::{Json, extract::State, http::HeaderValue, response::Response};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    core::{auth::AuthUser, coordinator::PendingTurn},
    models::{
        chat::{Attachment, IncomingMessage, Role, Turn},
        error::{ApiError, ApiResult},
        memory::MemoryMessage,
        prompt::GenerationRequest,
    },
    state::AppState,
    utils::{ids, streaming::text_stream_response},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
}

/// Streams the assistant reply as plain text. The chat id, generated when
/// the caller sent none, comes back in `x-chat-id`; the turn pair is
/// persisted after the stream ends.
pub async fn chat(
    user: AuthUser,
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Response> {
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("Invalid messages".to_string()));
    }
    let last_user = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .cloned()
        .ok_or_else(|| ApiError::BadRequest("Invalid messages".to_string()))?;

    let chat_id = request
        .chat_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(ids::chat_id);
    let chat_id_header = HeaderValue::from_str(&chat_id)
        .map_err(|_| ApiError::BadRequest("Invalid chat id".to_string()))?;
    let attachments = request.attachments.unwrap_or_default();

    let prepared = state.extractor.prepare_all(attachments.clone()).await;
    let memories = state
        .recall
        .recall(&state.memory, &last_user.content, &user.user_id)
        .await;
    let assembled = state
        .assembler
        .assemble(&request.messages, &prepared, &memories);

    let backend = state.router.select(assembled.capability)?;
    debug!(
        chat_id = %chat_id,
        capability = assembled.capability.as_str(),
        memories = memories.len(),
        attachments = attachments.len(),
        "dispatching turn"
    );

    let generation = GenerationRequest {
        messages: assembled.messages,
        temperature: state.settings.generation.temperature,
        max_output_tokens: state.settings.generation.max_output_tokens,
    };
    let events = backend.stream(&generation).await?;

    let pending = PendingTurn {
        chat_id: chat_id.clone(),
        user_id: user.user_id.clone(),
        user_turn: Turn {
            id: last_user.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            role: Role::User,
            content: last_user.content,
            timestamp: Utc::now(),
            attachments,
            metadata: None,
        },
        model: backend.model().to_string(),
        conversation: request
            .messages
            .iter()
            .map(|m| MemoryMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect(),
        attachment_count: prepared.len(),
    };

    info!(
        chat_id = %chat_id,
        user_id = %user.user_id,
        provider = %backend.provider(),
        model = backend.model(),
        "streaming reply"
    );

    let (rx, _finalizer) = state.coordinator.spawn(events, pending);
    Ok(text_stream_response(rx, chat_id_header))
}
