//! HTTP Routes
//!
//! Public endpoints of the image service:
//! - `POST /image` - Upload an image (multipart field `data`)
//! - `GET /image/{image_id}` - Stream an image back
//! - `GET /health` - Health check
//! - `POST /rpc/{service}` - Internal RPC calls (see [`crate::rpc`])

pub mod health;
pub mod image;

use axum::{extract::DefaultBodyLimit, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::models::AppState;
use crate::rpc;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .merge(image::router(state.clone()))
        .merge(rpc::router(state.clone()))
        .merge(health::router(state))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
