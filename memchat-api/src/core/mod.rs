pub mod auth;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod extraction;
pub mod memory;
pub mod model_router;
pub mod providers;
pub mod retry;
pub mod storage;
pub mod titles;
pub mod uploads;
