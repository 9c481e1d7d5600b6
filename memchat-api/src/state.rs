//! Application state shared by every handler.
//!
//! Everything here is built once at startup and read-only afterwards; the
//! stores carry their own interior locking.

use axum::extract::FromRef;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::{
    auth::AuthManager,
    config::{Settings, StorageBackend},
    context::{ContextAssembler, ContextLimits},
    coordinator::StreamCoordinator,
    extraction::AttachmentExtractor,
    memory::{MemoryGateway, RecallPolicy},
    model_router::{ModelRouter, ProviderCredentials},
    retry::RetryPolicy,
    storage::{
        ChatStore, FileStore, InMemoryChatStore, InMemoryFileStore, InMemorySessionStore,
        Neo4jChatStore, Neo4jClient, Neo4jConfig, Neo4jFileStore, Neo4jSessionStore,
        SessionStore,
    },
    titles::TitleGenerator,
    uploads::{CloudinaryStorage, ObjectStorage, UploadService, UploadcareClient},
};
use crate::models::prompt::Capability;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub auth: Arc<AuthManager>,
    pub chats: Arc<dyn ChatStore>,
    pub files: Arc<dyn FileStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub router: Arc<ModelRouter>,
    pub extractor: AttachmentExtractor,
    pub assembler: Arc<ContextAssembler>,
    pub memory: MemoryGateway,
    pub recall: RecallPolicy,
    pub titles: TitleGenerator,
    pub coordinator: StreamCoordinator,
    pub uploads: UploadService,
}

impl FromRef<AppState> for Arc<AuthManager> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

struct Stores {
    chats: Arc<dyn ChatStore>,
    files: Arc<dyn FileStore>,
    sessions: Arc<dyn SessionStore>,
}

fn build_stores(settings: &Settings) -> Stores {
    match settings.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Stores {
                chats: Arc::new(InMemoryChatStore::new()),
                files: Arc::new(InMemoryFileStore::new()),
                sessions: Arc::new(InMemorySessionStore::new()),
            }
        },
        StorageBackend::Neo4j => {
            info!("Using Neo4j storage at {}", settings.storage.neo4j_uri);
            let client = Arc::new(Neo4jClient::new(Neo4jConfig {
                uri: settings.storage.neo4j_uri.clone(),
                user: settings.storage.neo4j_user.clone(),
                password: settings.storage.neo4j_password.clone(),
            }));
            Stores {
                chats: Arc::new(Neo4jChatStore::new(client.clone())),
                files: Arc::new(Neo4jFileStore::new(client.clone())),
                sessions: Arc::new(Neo4jSessionStore::new(client)),
            }
        },
    }
}

impl AppState {
    /// Wires every component from settings and provider credentials. Object
    /// storage defaults to Cloudinary.
    pub fn build(settings: Settings, credentials: ProviderCredentials) -> Self {
        let client = reqwest::Client::new();
        let storage: Arc<dyn ObjectStorage> =
            Arc::new(CloudinaryStorage::new(client.clone(), &settings.uploads));
        Self::build_with_storage(settings, credentials, client, storage)
    }

    pub fn build_with_storage(
        settings: Settings,
        credentials: ProviderCredentials,
        client: reqwest::Client,
        object_storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        if credentials.is_empty() {
            warn!("No model provider credentials configured; /chat will fail");
        }

        let stores = build_stores(&settings);
        let router = Arc::new(ModelRouter::new(credentials, settings.providers.clone()));

        // Resolved once; absent when no text provider is configured.
        let title_backend = match router.select(Capability::Text) {
            Ok(backend) => {
                info!(provider = %backend.provider(), model = backend.model(), "title backend ready");
                Some(backend)
            },
            Err(e) => {
                warn!(error = %e, "title generation disabled");
                None
            },
        };

        let memory = MemoryGateway::new(
            client.clone(),
            &settings.memory.base_url,
            &settings.memory.api_key,
        );

        let coordinator = StreamCoordinator::new(
            stores.chats.clone(),
            memory.clone(),
            RetryPolicy::default(),
            settings.memory.capture_window,
        );

        let uploads = UploadService::new(
            UploadcareClient::new(client.clone(), &settings.uploads),
            object_storage,
            stores.files.clone(),
        );

        Self {
            auth: Arc::new(AuthManager::new(settings.auth.secret_key.clone())),
            extractor: AttachmentExtractor::new(
                client,
                settings.context.preview_chars,
                settings.context.max_attachment_bytes,
            ),
            assembler: Arc::new(ContextAssembler::new(ContextLimits {
                recent_user_turns: settings.context.recent_user_turns,
                max_document_chars: settings.context.max_document_chars,
                max_context_tokens: settings.context.max_context_tokens,
            })),
            recall: RecallPolicy::from_config(&settings.memory),
            titles: TitleGenerator::new(
                title_backend,
                settings.generation.title_temperature,
                settings.generation.title_max_tokens,
            ),
            chats: stores.chats,
            files: stores.files,
            sessions: stores.sessions,
            router,
            memory,
            coordinator,
            uploads,
            settings: Arc::new(settings),
        }
    }
}
