//! Image service façade
//!
//! Names new images and hands the actual storage work to the configured
//! [`ImageHost`]. Host errors are returned untouched; translating them for
//! a transport is the job of `routes` and `rpc`.

use bytes::Bytes;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::storage::{ImageHost, ImageHostError, ImageStream};

#[derive(Clone)]
pub struct ImageService {
    host: Arc<dyn ImageHost>,
}

impl ImageService {
    pub fn new(host: Arc<dyn ImageHost>) -> Self {
        Self { host }
    }

    /// Fresh identifier: a random 128-bit token as 32 lowercase hex chars.
    pub fn generate_image_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Store a new image and return the identifier it was stored under.
    pub async fn new_image(&self, image: Bytes) -> Result<String, ImageHostError> {
        let image_id = Self::generate_image_id();
        info!(image_id = %image_id, size = image.len(), "Storing new image");

        self.host.upload_image(image, &image_id).await?;

        Ok(image_id)
    }

    pub async fn download_image(&self, image_id: &str) -> Result<ImageStream, ImageHostError> {
        info!(image_id = %image_id, "Fetching image");
        self.host.download_image(image_id).await
    }
}
