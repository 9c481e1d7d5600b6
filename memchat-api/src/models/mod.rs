pub mod chat;
pub mod error;
pub mod file;
pub mod memory;
pub mod prompt;
pub mod session;
