use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub memory: MemoryConfig,
    pub context: ContextConfig,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub providers: ProviderUrls,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub secret_key: String,
    pub token_expiry_hours: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Neo4j,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MemoryConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub search_limit: usize,
    pub relevance_threshold: f64,
    pub max_injected: usize,
    pub capture_window: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContextConfig {
    pub recent_user_turns: usize,
    pub preview_chars: usize,
    pub max_document_chars: usize,
    pub max_context_tokens: usize,
    pub max_attachment_bytes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub title_temperature: f32,
    pub title_max_tokens: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct UploadsConfig {
    pub uploadcare_base_url: String,
    pub uploadcare_public_key: String,
    pub uploadcare_secret_key: String,
    pub cloudinary_base_url: String,
    pub cloudinary_cloud_name: String,
    pub cloudinary_api_key: String,
    pub cloudinary_api_secret: String,
    pub folder: String,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            uploadcare_base_url: "https://api.uploadcare.com".to_string(),
            uploadcare_public_key: String::new(),
            uploadcare_secret_key: String::new(),
            cloudinary_base_url: "https://api.cloudinary.com/v1_1".to_string(),
            cloudinary_cloud_name: String::new(),
            cloudinary_api_key: String::new(),
            cloudinary_api_secret: String::new(),
            folder: "memchat".to_string(),
        }
    }
}

/// Optional base-URL overrides for the model providers (proxies, tests).
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProviderUrls {
    pub cohere_base_url: Option<String>,
    pub google_base_url: Option<String>,
    pub mistral_base_url: Option<String>,
    pub openai_base_url: Option<String>,
    pub anthropic_base_url: Option<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Self::defaults()?
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("MEMCHAT").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Built-in defaults only, ignoring files and the environment.
    pub fn default_settings() -> Result<Self, ConfigError> {
        Self::defaults()?.build()?.try_deserialize()
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("auth.secret_key", "change-me-in-production")?
            .set_default("auth.token_expiry_hours", 24)?
            .set_default("storage.backend", "memory")?
            .set_default("storage.neo4j_uri", "bolt://localhost:7687")?
            .set_default("storage.neo4j_user", "neo4j")?
            .set_default("storage.neo4j_password", "password")?
            .set_default("memory.base_url", "https://api.mem0.ai")?
            .set_default("memory.api_key", "")?
            .set_default("memory.search_limit", 5)?
            .set_default("memory.relevance_threshold", 0.7)?
            .set_default("memory.max_injected", 3)?
            .set_default("memory.capture_window", 10)?
            .set_default("context.recent_user_turns", 3)?
            .set_default("context.preview_chars", 500)?
            .set_default("context.max_document_chars", 12000)?
            .set_default("context.max_context_tokens", 100000)?
            .set_default("context.max_attachment_bytes", 20 * 1024 * 1024)?
            .set_default("generation.temperature", 0.7)?
            .set_default("generation.max_output_tokens", 2048)?
            .set_default("generation.title_temperature", 0.3)?
            .set_default("generation.title_max_tokens", 20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_policy() {
        let settings = Settings::default_settings().unwrap();

        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.memory.max_injected, 3);
        assert!((settings.memory.relevance_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(settings.context.recent_user_turns, 3);
        assert_eq!(settings.context.preview_chars, 500);
        assert_eq!(settings.context.max_attachment_bytes, 20 * 1024 * 1024);
        assert_eq!(settings.generation.max_output_tokens, 2048);
        assert_eq!(settings.uploads.folder, "memchat");
        assert!(settings.providers.openai_base_url.is_none());
    }
}
