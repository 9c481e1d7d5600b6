pub mod admin;
pub mod chat;
pub mod chats;
pub mod files;
pub mod memory;

pub async fn health_check() -> &'static str {
    "OK"
}
