use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{
    core::auth::AuthUser,
    models::{
        error::{ApiError, ApiResult},
        memory::MemoryMessage,
    },
    state::AppState,
};

const DEFAULT_LISTING_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
pub struct MemoryQuery {
    pub query: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryPostRequest {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub messages: Option<Vec<MemoryMessage>>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MemoryUpdateRequest {
    #[serde(default)]
    pub memory: String,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Searches when a query is given, otherwise lists the caller's memories.
pub async fn list_memories(
    user: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<MemoryQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_LISTING_LIMIT);

    let response = match non_blank(params.query.as_deref()) {
        Some(query) => state.memory.search(query, &user.user_id, limit).await,
        None => state.memory.get_all(&user.user_id, limit).await,
    };

    Ok(Json(response))
}

/// `search` and `create` actions, or a conversation capture when neither
/// action applies.
pub async fn post_memory(
    user: AuthUser,
    State(state): State<AppState>,
    Json(request): Json<MemoryPostRequest>,
) -> ApiResult<impl IntoResponse> {
    let action = request.action.as_deref();

    if action == Some("search")
        && let Some(query) = non_blank(request.query.as_deref())
    {
        let response = state
            .memory
            .search(query, &user.user_id, DEFAULT_LISTING_LIMIT)
            .await;
        return Ok(Json(json!({ "memories": response.results })));
    }

    if action == Some("create")
        && let Some(memory) = non_blank(request.memory.as_deref())
    {
        let message = MemoryMessage {
            role: "user".to_string(),
            content: memory.to_string(),
        };
        let result = state
            .memory
            .add(vec![message], &user.user_id, request.metadata.unwrap_or_default())
            .await;
        return Ok(Json(json!({ "success": true, "memory": result })));
    }

    let messages = request
        .messages
        .ok_or_else(|| ApiError::BadRequest("Invalid messages format".to_string()))?;

    let result = state
        .memory
        .capture_conversation(
            &messages,
            &user.user_id,
            request.chat_id.as_deref(),
            state.settings.memory.capture_window,
            request.metadata.unwrap_or_default(),
        )
        .await;

    Ok(Json(json!({ "success": true, "result": result })))
}

pub async fn update_memory(
    user: AuthUser,
    State(state): State<AppState>,
    Path(memory_id): Path<String>,
    Json(request): Json<MemoryUpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.memory.trim().is_empty() {
        return Err(ApiError::BadRequest("Memory content is required".to_string()));
    }

    let result = state
        .memory
        .update(&memory_id, &user.user_id, &request.memory)
        .await;
    Ok(Json(json!({ "success": true, "result": result })))
}

pub async fn delete_memory(
    user: AuthUser,
    State(state): State<AppState>,
    Path(memory_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let result = state.memory.delete(&memory_id, &user.user_id).await;
    Ok(Json(json!({ "success": true, "result": result })))
}
