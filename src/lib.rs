// Prog Image - image upload and delivery service backed by a hosted image store

pub mod config;
pub mod models;
pub mod types;
pub mod storage;
pub mod service;
pub mod routes;
pub mod rpc;       // Internal RPC surface for other services
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;
pub use service::ImageService;
pub use storage::{ImageHost, ImageHostError, ImageStream};

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
