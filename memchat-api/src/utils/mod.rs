pub mod ids;
pub mod streaming;
