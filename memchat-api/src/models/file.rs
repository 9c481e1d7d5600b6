use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chat::Attachment;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub original_filename: String,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Stored record of an uploaded file, owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploadcare_uuid: Option<String>,
    pub cloudinary_public_id: String,
    pub cloudinary_url: String,
    pub metadata: FileMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn attachment(&self) -> Attachment {
        Attachment {
            id: self.id.clone(),
            name: self.name.clone(),
            media_type: self.media_type.clone(),
            size: self.size,
            url: self.cloudinary_url.clone(),
            uploadcare_uuid: self.uploadcare_uuid.clone(),
            cloudinary_public_id: Some(self.cloudinary_public_id.clone()),
        }
    }
}
