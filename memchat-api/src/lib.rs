//! memchat API
//!
//! A chat backend that streams model replies as plain text, folds PDF
//! attachments and long-term memory into the prompt, routes each turn to a
//! text or vision provider, and persists every exchange once the stream ends.

pub mod api;
pub mod core;
pub mod middleware;
pub mod models;
pub mod state;
pub mod utils;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use state::AppState;

/// All routes, with request-id, error logging, tracing and CORS layers.
pub fn create_router(state: AppState) -> Router {
    use crate::middleware::{error_handler, request_id};

    let chat_routes = Router::new()
        .route("/chat", post(api::chat::chat))
        .route("/chat/new", post(api::chats::create_chat))
        .route("/chat/history", get(api::chats::chat_history))
        .route(
            "/chat/:chat_id",
            get(api::chats::get_chat)
                .patch(api::chats::rename_chat)
                .delete(api::chats::delete_chat),
        );

    let file_routes = Router::new()
        .route("/files/upload", post(api::files::upload_file))
        .route("/files/:file_id", delete(api::files::delete_file));

    let memory_routes = Router::new()
        .route(
            "/memory",
            get(api::memory::list_memories).post(api::memory::post_memory),
        )
        .route(
            "/memory/:memory_id",
            put(api::memory::update_memory).delete(api::memory::delete_memory),
        );

    let admin_routes = Router::new()
        .route("/admin/cleanup", post(api::admin::cleanup))
        .route("/admin/db-stats", get(api::admin::db_stats));

    Router::new()
        .route("/health", get(api::health_check))
        .merge(chat_routes)
        .merge(file_routes)
        .merge(memory_routes)
        .merge(admin_routes)
        .with_state(state)
        .layer(axum::middleware::from_fn(error_handler::log_errors))
        .layer(axum::middleware::from_fn(request_id::add_request_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
