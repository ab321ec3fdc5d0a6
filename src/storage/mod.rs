//! Image storage layer
//!
//! Images live on a hosted image store. This module defines the contract
//! the rest of the service talks to:
//! - [`ImageHost`] - upload bytes under an identifier, stream them back
//! - [`ImageHostError`] - the three ways a host call can fail
//! - [`HostProvider`] - process lifecycle of the configured client
//!
//! The only implementation is [`cloudinary::CloudinaryClient`].

pub mod cloudinary;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::CloudinaryConfig;
pub use cloudinary::CloudinaryClient;

/// Image bytes as they arrive from the host, one chunk at a time.
pub type ImageStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Errors returned by an [`ImageHost`]
#[derive(Debug, Error)]
pub enum ImageHostError {
    #[error("Unable to upload image with ID {image_id} - {reason}")]
    Upload { image_id: String, reason: String },

    #[error("Image {image_id} not found")]
    NotFound { image_id: String },

    #[error("Unexpected error when downloading image {image_id} - {detail}")]
    Download { image_id: String, detail: String },
}

impl ImageHostError {
    /// Stable name of the error kind, as reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            ImageHostError::Upload { .. } => "ImageUploadError",
            ImageHostError::NotFound { .. } => "ImageNotFound",
            ImageHostError::Download { .. } => "ImageDownloadError",
        }
    }

    pub fn image_id(&self) -> &str {
        match self {
            ImageHostError::Upload { image_id, .. }
            | ImageHostError::NotFound { image_id }
            | ImageHostError::Download { image_id, .. } => image_id,
        }
    }
}

/// Metadata the host returns for a stored image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadResponse {
    pub public_id: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub secure_url: Option<String>,
}

#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Store `image` under `image_id`. A single attempt; failures are final.
    async fn upload_image(&self, image: Bytes, image_id: &str)
        -> Result<UploadResponse, ImageHostError>;

    /// Fetch the image stored under `image_id` without buffering it.
    async fn download_image(&self, image_id: &str) -> Result<ImageStream, ImageHostError>;
}

/// Lifecycle errors raised while bringing a host up
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Invalid host configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Entry point of the host lifecycle.
///
/// `setup` -> [`ConfiguredHost`] -> `start` -> [`ActiveHost`] -> `stop`/`kill`
/// -> [`ConfiguredHost`]. Only an [`ActiveHost`] hands out a client, so the
/// client cannot be used before it is configured.
pub struct HostProvider;

impl HostProvider {
    pub fn setup(config: CloudinaryConfig) -> Result<ConfiguredHost, ProviderError> {
        for (name, value) in [
            ("cloud_name", &config.cloud_name),
            ("api_key", &config.api_key),
            ("api_secret", &config.api_secret),
        ] {
            if value.trim().is_empty() {
                return Err(ProviderError::InvalidConfig(format!("{} is empty", name)));
            }
        }

        reqwest::Url::parse(&config.delivery_base_url).map_err(|e| {
            ProviderError::InvalidConfig(format!("delivery_base_url is not a URL: {}", e))
        })?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        info!(cloud_name = %config.cloud_name, "Image host configured");
        Ok(ConfiguredHost { config, http })
    }
}

pub struct ConfiguredHost {
    config: CloudinaryConfig,
    http: reqwest::Client,
}

impl ConfiguredHost {
    pub fn config(&self) -> &CloudinaryConfig {
        &self.config
    }

    pub fn start(self) -> ActiveHost {
        let client = CloudinaryClient::with_http_client(self.config.clone(), self.http.clone());
        info!("Image host started");
        ActiveHost {
            configured: self,
            client: Arc::new(client),
        }
    }
}

pub struct ActiveHost {
    configured: ConfiguredHost,
    client: Arc<dyn ImageHost>,
}

impl ActiveHost {
    /// Shared handle given to request handlers.
    pub fn client(&self) -> Arc<dyn ImageHost> {
        Arc::clone(&self.client)
    }

    /// Drop the client. In-flight calls holding a handle run to completion.
    pub fn stop(self) -> ConfiguredHost {
        info!("Image host stopped");
        self.configured
    }

    /// Drop the client immediately.
    pub fn kill(self) -> ConfiguredHost {
        info!("Image host killed");
        self.configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_and_messages() {
        let upload = ImageHostError::Upload {
            image_id: "abc123".to_string(),
            reason: "BOOM!".to_string(),
        };
        assert_eq!(upload.kind(), "ImageUploadError");
        assert_eq!(upload.to_string(), "Unable to upload image with ID abc123 - BOOM!");

        let not_found = ImageHostError::NotFound {
            image_id: "abc123".to_string(),
        };
        assert_eq!(not_found.kind(), "ImageNotFound");
        assert_eq!(not_found.to_string(), "Image abc123 not found");

        let download = ImageHostError::Download {
            image_id: "abc123".to_string(),
            detail: "b\"BOOM!\"".to_string(),
        };
        assert_eq!(download.kind(), "ImageDownloadError");
        assert_eq!(download.image_id(), "abc123");
        assert_eq!(
            download.to_string(),
            "Unexpected error when downloading image abc123 - b\"BOOM!\""
        );
    }

    #[test]
    fn test_setup_rejects_empty_credentials() {
        let result = HostProvider::setup(CloudinaryConfig::new("cloud_1", "", "secret"));
        assert!(matches!(result, Err(ProviderError::InvalidConfig(msg)) if msg.contains("api_key")));
    }

    #[test]
    fn test_setup_rejects_invalid_delivery_url() {
        let config = CloudinaryConfig::new("cloud_1", "123", "secret").with_base_url("not a url");
        let result = HostProvider::setup(config);
        assert!(matches!(result, Err(ProviderError::InvalidConfig(msg)) if msg.contains("delivery_base_url")));
    }

    #[test]
    fn test_lifecycle_restarts_after_stop_and_kill() {
        let configured = HostProvider::setup(CloudinaryConfig::new("cloud_1", "123", "secret"))
            .unwrap();
        assert_eq!(configured.config().cloud_name, "cloud_1");

        let active = configured.start();
        let handle = active.client();
        let configured = active.stop();
        // Handles taken before stop stay usable.
        drop(handle);

        let active = configured.start();
        let configured = active.kill();
        assert_eq!(configured.config().api_key, "123");
    }

    #[test]
    fn test_upload_response_tolerates_missing_fields() {
        let response: UploadResponse =
            serde_json::from_str(r#"{"public_id": "abc123", "version": 1, "extra": true}"#)
                .unwrap();
        assert_eq!(response.public_id, "abc123");
        assert_eq!(response.version, Some(1));
        assert!(response.secure_url.is_none());
    }
}
