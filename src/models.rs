use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::service::ImageService;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub images: ImageService,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewImageResponse {
    pub image_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: String,
}
