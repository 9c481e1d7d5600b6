//! Long-term memory backed by the external memory service.
//!
//! - `gateway`: fail-soft HTTP client (add, search, list, update, delete)
//! - `recall`: relevance filtering applied before memories reach a prompt

mod gateway;
mod recall;

pub use gateway::{MemoryGateway, conversation_window};
pub use recall::RecallPolicy;
