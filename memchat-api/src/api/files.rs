use axum::{
    Json,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::header,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    core::{
        auth::AuthUser,
        uploads::{DirectUpload, UploadError},
    },
    models::{
        error::{ApiError, ApiResult},
        file::FileRecord,
    },
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadcareRequest {
    #[serde(default)]
    pub uploadcare_uuid: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub size: u64,
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploadcare_uuid: Option<String>,
    pub cloudinary_url: String,
    pub file: UploadedFile,
}

impl From<FileRecord> for UploadResponse {
    fn from(file: FileRecord) -> Self {
        Self {
            id: file.id.clone(),
            uploadcare_uuid: file.uploadcare_uuid,
            cloudinary_url: file.cloudinary_url.clone(),
            file: UploadedFile {
                id: file.id,
                name: file.name,
                media_type: file.media_type,
                size: file.size,
                url: file.cloudinary_url,
            },
        }
    }
}

/// Accepts either a multipart body with a `file` part or a JSON reference to
/// a file already held by the upload service.
pub async fn upload_file(
    user: AuthUser,
    State(state): State<AppState>,
    request: Request,
) -> ApiResult<impl IntoResponse> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let file = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let (chat_id, upload) = read_multipart(multipart).await?;
        state
            .uploads
            .store_direct(&user.user_id, chat_id, upload)
            .await?
    } else {
        let Json(body) = Json::<UploadcareRequest>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        state
            .uploads
            .import_uploadcare(&user.user_id, body.uploadcare_uuid.as_deref(), body.chat_id)
            .await?
    };

    Ok(Json(UploadResponse::from(file)))
}

async fn read_multipart(mut multipart: Multipart) -> ApiResult<(Option<String>, DirectUpload)> {
    let mut chat_id = None;
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let media_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                upload = Some(DirectUpload {
                    name,
                    media_type,
                    bytes: bytes.to_vec(),
                });
            },
            Some("chatId") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                chat_id = Some(value).filter(|v| !v.trim().is_empty());
            },
            _ => {},
        }
    }

    let upload =
        upload.ok_or_else(|| UploadError::MissingReference("Missing file".to_string()))?;
    Ok((chat_id, upload))
}

pub async fn delete_file(
    user: AuthUser,
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.uploads.delete(&user.user_id, &file_id).await?;
    Ok(Json(json!({ "success": true })))
}
