//! File uploads: resolving upload-service references, copying bytes into
//! object storage and recording the resulting File documents.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

use super::storage::{FileStore, StoreError};
use crate::core::config::UploadsConfig;
use crate::models::file::{FileMetadata, FileRecord};
use crate::utils::ids;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{0}")]
    MissingReference(String),

    #[error("upload service error: {0}")]
    UploadService(String),

    #[error("object storage error: {0}")]
    ObjectStorage(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// File info as reported by the upload service.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadcareFile {
    pub original_filename: String,
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    pub original_file_url: String,
}

#[derive(Clone)]
pub struct UploadcareClient {
    client: reqwest::Client,
    base_url: String,
    public_key: String,
    secret_key: String,
}

impl UploadcareClient {
    pub fn new(client: reqwest::Client, config: &UploadsConfig) -> Self {
        Self {
            client,
            base_url: config.uploadcare_base_url.trim_end_matches('/').to_string(),
            public_key: config.uploadcare_public_key.clone(),
            secret_key: config.uploadcare_secret_key.clone(),
        }
    }

    pub async fn file_info(&self, uuid: &str) -> Result<UploadcareFile, UploadError> {
        let response = self
            .client
            .get(format!("{}/files/{uuid}/", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Uploadcare.Simple {}:{}", self.public_key, self.secret_key),
            )
            .header(reqwest::header::ACCEPT, "application/vnd.uploadcare-v0.7+json")
            .send()
            .await
            .map_err(|e| UploadError::UploadService(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::UploadService(format!(
                "file info for {uuid} returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| UploadError::UploadService(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub public_id: String,
    pub url: String,
}

/// Where uploaded bytes end up for good.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Copies a file the storage can fetch by URL.
    async fn upload_remote(&self, url: &str, file_name: &str) -> Result<StoredObject, UploadError>;

    async fn upload_bytes(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        media_type: &str,
    ) -> Result<StoredObject, UploadError>;

    async fn destroy(&self, public_id: &str) -> Result<(), UploadError>;
}

#[derive(Debug, Deserialize)]
struct CloudinaryUpload {
    public_id: String,
    secure_url: String,
}

/// Signed uploads against the Cloudinary REST API.
#[derive(Clone)]
pub struct CloudinaryStorage {
    client: reqwest::Client,
    base_url: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
    folder: String,
}

impl CloudinaryStorage {
    pub fn new(client: reqwest::Client, config: &UploadsConfig) -> Self {
        Self {
            client,
            base_url: config.cloudinary_base_url.trim_end_matches('/').to_string(),
            cloud_name: config.cloudinary_cloud_name.clone(),
            api_key: config.cloudinary_api_key.clone(),
            api_secret: config.cloudinary_api_secret.clone(),
            folder: config.folder.clone(),
        }
    }

    /// Form fields plus the signature over them. `params` must already be
    /// sorted by key.
    fn signed_form(&self, params: Vec<(&'static str, String)>) -> Form {
        let signature = sign(&params, &self.api_secret);

        params
            .into_iter()
            .fold(Form::new(), |form, (key, value)| form.text(key, value))
            .text("api_key", self.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256")
    }

    fn upload_params(&self, file_name: &str) -> Vec<(&'static str, String)> {
        let now = Utc::now();
        vec![
            ("folder", self.folder.clone()),
            (
                "public_id",
                format!("{}-{}", now.timestamp_millis(), public_name(file_name)),
            ),
            ("timestamp", now.timestamp().to_string()),
        ]
    }

    async fn post_upload(&self, form: Form) -> Result<StoredObject, UploadError> {
        let response = self
            .client
            .post(format!("{}/{}/auto/upload", self.base_url, self.cloud_name))
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::ObjectStorage(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::ObjectStorage(format!("upload returned {status}: {body}")));
        }

        let uploaded: CloudinaryUpload = response
            .json()
            .await
            .map_err(|e| UploadError::ObjectStorage(e.to_string()))?;

        Ok(StoredObject {
            public_id: uploaded.public_id,
            url: uploaded.secure_url,
        })
    }
}

#[async_trait]
impl ObjectStorage for CloudinaryStorage {
    async fn upload_remote(&self, url: &str, file_name: &str) -> Result<StoredObject, UploadError> {
        let form = self
            .signed_form(self.upload_params(file_name))
            .text("file", url.to_string());
        self.post_upload(form).await
    }

    async fn upload_bytes(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        media_type: &str,
    ) -> Result<StoredObject, UploadError> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(media_type)
            .map_err(|e| UploadError::ObjectStorage(e.to_string()))?;
        let form = self.signed_form(self.upload_params(file_name)).part("file", part);
        self.post_upload(form).await
    }

    async fn destroy(&self, public_id: &str) -> Result<(), UploadError> {
        let params = vec![
            ("public_id", public_id.to_string()),
            ("timestamp", Utc::now().timestamp().to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/{}/image/destroy", self.base_url, self.cloud_name))
            .multipart(self.signed_form(params))
            .send()
            .await
            .map_err(|e| UploadError::ObjectStorage(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UploadError::ObjectStorage(format!(
                "destroy {public_id} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Hex SHA-256 of `k1=v1&k2=v2{secret}`.
fn sign(params: &[(&str, String)], secret: &str) -> String {
    let joined = params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");

    hex::encode(Sha256::digest(format!("{joined}{secret}").as_bytes()))
}

/// File name usable inside a public id: extension dropped, separators replaced.
fn public_name(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);

    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// An upload received directly in the request body.
pub struct DirectUpload {
    pub name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct UploadService {
    uploadcare: UploadcareClient,
    storage: Arc<dyn ObjectStorage>,
    files: Arc<dyn FileStore>,
}

impl UploadService {
    pub fn new(
        uploadcare: UploadcareClient,
        storage: Arc<dyn ObjectStorage>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            uploadcare,
            storage,
            files,
        }
    }

    /// Copies a file already held by the upload service into object storage.
    pub async fn import_uploadcare(
        &self,
        user_id: &str,
        uuid: Option<&str>,
        chat_id: Option<String>,
    ) -> Result<FileRecord, UploadError> {
        let uuid = uuid
            .map(str::trim)
            .filter(|uuid| !uuid.is_empty())
            .ok_or_else(|| UploadError::MissingReference("Missing uploadcare UUID".to_string()))?;

        let info = self.uploadcare.file_info(uuid).await?;
        let stored = self
            .storage
            .upload_remote(&info.original_file_url, &info.original_filename)
            .await?;

        self.record(
            user_id,
            chat_id,
            info.original_filename,
            info.mime_type,
            info.size,
            Some(uuid.to_string()),
            stored,
        )
        .await
    }

    pub async fn store_direct(
        &self,
        user_id: &str,
        chat_id: Option<String>,
        upload: DirectUpload,
    ) -> Result<FileRecord, UploadError> {
        if upload.bytes.is_empty() {
            return Err(UploadError::MissingReference("Empty file".to_string()));
        }

        let size = upload.bytes.len() as u64;
        let stored = self
            .storage
            .upload_bytes(upload.bytes, &upload.name, &upload.media_type)
            .await?;

        self.record(user_id, chat_id, upload.name, upload.media_type, size, None, stored)
            .await
    }

    /// Removes the stored object first, then the document. Missing and
    /// foreign files are both `NotFound`.
    pub async fn delete(&self, user_id: &str, file_id: &str) -> Result<(), UploadError> {
        let file = self
            .files
            .get(file_id, user_id)
            .await?
            .ok_or_else(StoreError::file_not_found)?;

        if !file.cloudinary_public_id.is_empty() {
            self.storage.destroy(&file.cloudinary_public_id).await?;
        }
        self.files.delete(file_id, user_id).await?;

        info!(file_id, user_id, "deleted file");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        user_id: &str,
        chat_id: Option<String>,
        name: String,
        media_type: String,
        size: u64,
        uploadcare_uuid: Option<String>,
        stored: StoredObject,
    ) -> Result<FileRecord, UploadError> {
        let now = Utc::now();
        let file = FileRecord {
            id: ids::file_id(),
            user_id: user_id.to_string(),
            chat_id,
            name: name.clone(),
            media_type: media_type.clone(),
            size,
            uploadcare_uuid,
            cloudinary_public_id: stored.public_id.clone(),
            cloudinary_url: stored.url,
            metadata: FileMetadata {
                original_filename: name,
                mime_type: media_type,
                uploaded_at: now,
            },
            created_at: now,
            updated_at: now,
        };

        match self.files.create(file).await {
            Ok(file) => {
                info!(file_id = %file.id, user_id, size, "stored upload");
                Ok(file)
            },
            Err(e) => {
                warn!(public_id = %stored.public_id, error = %e, "file document not saved after upload");
                Err(e.into())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::InMemoryFileStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingStorage {
        destroyed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStorage for RecordingStorage {
        async fn upload_remote(&self, url: &str, file_name: &str) -> Result<StoredObject, UploadError> {
            Ok(StoredObject {
                public_id: format!("memchat/{file_name}"),
                url: format!("{url}#copied"),
            })
        }

        async fn upload_bytes(
            &self,
            _bytes: Vec<u8>,
            file_name: &str,
            _media_type: &str,
        ) -> Result<StoredObject, UploadError> {
            Ok(StoredObject {
                public_id: format!("memchat/{file_name}"),
                url: format!("https://cdn.test/{file_name}"),
            })
        }

        async fn destroy(&self, public_id: &str) -> Result<(), UploadError> {
            self.destroyed.lock().push(public_id.to_string());
            Ok(())
        }
    }

    fn config(uploadcare: &str, cloudinary: &str) -> UploadsConfig {
        UploadsConfig {
            uploadcare_base_url: uploadcare.to_string(),
            uploadcare_public_key: "pub".into(),
            uploadcare_secret_key: "sec".into(),
            cloudinary_base_url: cloudinary.to_string(),
            cloudinary_cloud_name: "demo".into(),
            cloudinary_api_key: "key".into(),
            cloudinary_api_secret: "shh".into(),
            folder: "memchat".into(),
        }
    }

    fn service(
        uploadcare_url: &str,
        storage: Arc<RecordingStorage>,
    ) -> (UploadService, Arc<InMemoryFileStore>) {
        let files = Arc::new(InMemoryFileStore::new());
        let uploadcare = UploadcareClient::new(reqwest::Client::new(), &config(uploadcare_url, ""));
        (UploadService::new(uploadcare, storage, files.clone()), files)
    }

    #[test]
    fn test_signature_covers_sorted_params_and_secret() {
        let params = vec![
            ("folder", "memchat".to_string()),
            ("timestamp", "1700000000".to_string()),
        ];
        let expected = hex::encode(Sha256::digest(b"folder=memchat&timestamp=1700000000shh"));

        assert_eq!(sign(&params, "shh"), expected);
    }

    #[test]
    fn test_public_name_strips_extension_and_separators() {
        assert_eq!(public_name("Quarterly report.v2.pdf"), "Quarterly_report_v2");
        assert_eq!(public_name("photo"), "photo");
    }

    #[tokio::test]
    async fn test_missing_uuid_is_rejected() {
        let (service, _) = service("http://127.0.0.1:9", Arc::default());
        let err = service.import_uploadcare("alice", Some("  "), None).await.unwrap_err();

        assert!(matches!(err, UploadError::MissingReference(_)));
    }

    #[tokio::test]
    async fn test_import_resolves_and_records_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/uuid-1/"))
            .and(header("authorization", "Uploadcare.Simple pub:sec"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "original_filename": "notes.pdf",
                "mime_type": "application/pdf",
                "size": 2048,
                "original_file_url": "https://ucarecdn.test/uuid-1/notes.pdf"
            })))
            .mount(&server)
            .await;

        let (service, files) = service(&server.uri(), Arc::default());
        let file = service
            .import_uploadcare("alice", Some("uuid-1"), Some("chat_1".into()))
            .await
            .unwrap();

        assert!(file.id.starts_with("file_"));
        assert_eq!(file.name, "notes.pdf");
        assert_eq!(file.size, 2048);
        assert_eq!(file.uploadcare_uuid.as_deref(), Some("uuid-1"));
        assert_eq!(file.cloudinary_url, "https://ucarecdn.test/uuid-1/notes.pdf#copied");
        assert!(files.get(&file.id, "alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_destroys_object_then_document() {
        let storage = Arc::new(RecordingStorage::default());
        let (service, files) = service("http://127.0.0.1:9", storage.clone());
        let file = service
            .store_direct(
                "alice",
                None,
                DirectUpload {
                    name: "a.png".into(),
                    media_type: "image/png".into(),
                    bytes: vec![1, 2, 3],
                },
            )
            .await
            .unwrap();

        let foreign = service.delete("bob", &file.id).await.unwrap_err();
        assert!(matches!(foreign, UploadError::Store(StoreError::NotFound(_))));

        service.delete("alice", &file.id).await.unwrap();
        assert_eq!(storage.destroyed.lock().as_slice(), ["memchat/a.png"]);
        assert!(files.get(&file.id, "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cloudinary_remote_upload_is_signed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/demo/auto/upload"))
            .and(body_string_contains("signature_algorithm"))
            .and(body_string_contains("https://files.test/a.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "public_id": "memchat/123-a",
                "secure_url": "https://res.test/memchat/123-a.pdf"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let storage = CloudinaryStorage::new(reqwest::Client::new(), &config("", &server.uri()));
        let stored = storage
            .upload_remote("https://files.test/a.pdf", "a.pdf")
            .await
            .unwrap();

        assert_eq!(stored.public_id, "memchat/123-a");
        assert_eq!(stored.url, "https://res.test/memchat/123-a.pdf");
    }
}
