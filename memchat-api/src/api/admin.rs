use axum::{Json, extract::State, response::IntoResponse};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    core::auth::AuthUser,
    models::{
        chat::ChatStats,
        error::{ApiError, ApiResult},
    },
    state::AppState,
};

fn default_days_old() -> i64 {
    90
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default = "default_days_old")]
    pub days_old: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub success: bool,
    pub deleted_count: u64,
    pub action: String,
}

pub async fn cleanup(
    user: AuthUser,
    State(state): State<AppState>,
    Json(request): Json<CleanupRequest>,
) -> ApiResult<impl IntoResponse> {
    let deleted_count = match request.action.as_str() {
        "cleanup_old_chats" => {
            if request.days_old < 0 {
                return Err(ApiError::BadRequest("daysOld must not be negative".to_string()));
            }
            let cutoff = Duration::try_days(request.days_old)
                .and_then(|age| Utc::now().checked_sub_signed(age))
                .ok_or_else(|| ApiError::BadRequest("daysOld out of range".to_string()))?;
            state
                .chats
                .cleanup_older_than(&user.user_id, cutoff)
                .await?
        },
        "cleanup_expired_sessions" => state.sessions.delete_expired(Utc::now()).await?,
        _ => return Err(ApiError::BadRequest("Invalid action".to_string())),
    };

    info!(
        action = %request.action,
        user_id = %user.user_id,
        deleted_count,
        "cleanup finished"
    );

    Ok(Json(CleanupResponse {
        success: true,
        deleted_count,
        action: request.action,
    }))
}

pub async fn db_stats(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let chat_stats = state.chats.stats(&user.user_id).await?;
    let stats = ChatStats {
        total_files: state.files.count(&user.user_id).await?,
        ..chat_stats
    };

    Ok(Json(json!({
        "stats": stats,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}
