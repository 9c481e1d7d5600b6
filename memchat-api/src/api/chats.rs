use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    core::{auth::AuthUser, storage::StoreError},
    models::{
        chat::{Chat, ChatSummary},
        error::{ApiError, ApiResult},
    },
    state::AppState,
    utils::ids,
};

/// Upper bound on the history listing.
const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChatRequest {
    #[serde(default)]
    pub first_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChatResponse {
    pub chat_id: String,
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub chats: Vec<ChatSummary>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub chat: Chat,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub title: String,
}

pub async fn create_chat(
    user: AuthUser,
    State(state): State<AppState>,
    request: Option<Json<NewChatRequest>>,
) -> ApiResult<impl IntoResponse> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let title = state.titles.generate(request.first_message.as_deref()).await;

    let chat = state
        .chats
        .create(Chat::new(ids::chat_id(), title, user.user_id.clone()))
        .await?;

    info!(chat_id = %chat.id, user_id = %user.user_id, "created chat");
    Ok(Json(NewChatResponse {
        chat_id: chat.id,
        title: chat.title,
    }))
}

pub async fn chat_history(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let chats = state.chats.list(&user.user_id, HISTORY_LIMIT).await?;
    Ok(Json(HistoryResponse { chats }))
}

pub async fn get_chat(
    user: AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let chat = state
        .chats
        .get(&chat_id, &user.user_id)
        .await?
        .ok_or_else(StoreError::chat_not_found)?;

    Ok(Json(ChatResponse { chat }))
}

pub async fn rename_chat(
    user: AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<impl IntoResponse> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("Title is required".to_string()));
    }

    state.chats.rename(&chat_id, &user.user_id, title).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn delete_chat(
    user: AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.chats.remove(&chat_id, &user.user_id).await?;

    info!(chat_id = %chat_id, user_id = %user.user_id, "deleted chat");
    Ok(Json(json!({ "success": true })))
}
