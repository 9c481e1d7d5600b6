//! Storage abstractions for chats, files and sessions
//!
//! ## Available Backends
//!
//! - `memory`: In-memory storage using `RwLock<HashMap>` tables (default)
//! - `neo4j`: Neo4j graph database storage, connected lazily on first use

mod memory;
pub mod neo4j;
mod traits;

pub use memory::*;
pub use neo4j::{Neo4jChatStore, Neo4jClient, Neo4jConfig, Neo4jFileStore, Neo4jSessionStore};
pub use traits::*;
