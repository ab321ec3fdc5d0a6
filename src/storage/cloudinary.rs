// Cloudinary image host
// Upload API: https://cloudinary.com/documentation/image_upload_api_reference
// Signing:    https://cloudinary.com/documentation/authentication_signatures
//
// Uploads go to the signed upload endpoint, downloads are plain GETs against
// the public delivery URL built from the cloud name and the public id.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use reqwest::{multipart, Client, StatusCode, Url};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

use super::{ImageHost, ImageHostError, ImageStream, UploadResponse};
use crate::config::CloudinaryConfig;

const RESOURCE_TYPE: &str = "image";
const DELIVERY_TYPE: &str = "upload";
const SIGNATURE_ALGORITHM: &str = "sha256";
/// Most of an error body kept for diagnostics
const MAX_ERROR_BODY: usize = 4 * 1024;

#[derive(Deserialize)]
struct CloudinaryErrorResponse {
    error: CloudinaryError,
}

#[derive(Deserialize)]
struct CloudinaryError {
    message: String,
}

pub struct CloudinaryClient {
    client: Client,
    config: CloudinaryConfig,
}

impl CloudinaryClient {
    pub fn new(config: CloudinaryConfig) -> Self {
        Self::with_http_client(config, Client::new())
    }

    pub fn with_http_client(config: CloudinaryConfig, client: Client) -> Self {
        Self { client, config }
    }

    /// Public delivery URL of an image. No network access.
    ///
    /// The id is always a single percent-encoded path segment, so `?`, `#`,
    /// `%` and `/` in an id never change which resource is addressed.
    pub fn image_url(&self, image_id: &str) -> Result<Url, ImageHostError> {
        // Bare dot segments would be dropped from the path; nothing is stored under them.
        if matches!(image_id, "" | "." | "..") {
            let err = ImageHostError::NotFound {
                image_id: image_id.to_string(),
            };
            error!(image_id = %image_id, "{}", err);
            return Err(err);
        }

        let mut url = Url::parse(&self.config.delivery_base_url).map_err(|e| {
            Self::download_error(image_id, format!("invalid delivery URL: {}", e))
        })?;
        url.path_segments_mut()
            .map_err(|_| Self::download_error(image_id, "delivery URL cannot be a base"))?
            .pop_if_empty()
            .extend([self.config.cloud_name.as_str(), RESOURCE_TYPE, DELIVERY_TYPE])
            .push(image_id);

        Ok(url)
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/v1_1/{}/{}/upload",
            self.config.upload_base_url.trim_end_matches('/'),
            self.config.cloud_name,
            RESOURCE_TYPE
        )
    }

    /// `k=v` pairs sorted by key and joined with `&`, followed by the secret.
    fn string_to_sign(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
        let joined = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}{}", joined, api_secret)
    }

    fn sign(params: &BTreeMap<&str, String>, api_secret: &str) -> String {
        let digest = Sha256::digest(Self::string_to_sign(params, api_secret).as_bytes());
        hex::encode(digest)
    }

    fn upload_error(image_id: &str, reason: impl Into<String>) -> ImageHostError {
        let err = ImageHostError::Upload {
            image_id: image_id.to_string(),
            reason: reason.into(),
        };
        error!(image_id = %image_id, "{}", err);
        err
    }

    fn download_error(image_id: &str, detail: impl Into<String>) -> ImageHostError {
        let err = ImageHostError::Download {
            image_id: image_id.to_string(),
            detail: detail.into(),
        };
        error!(image_id = %image_id, "{}", err);
        err
    }
}

/// Read at most [`MAX_ERROR_BODY`] bytes of an error response. The flag is
/// set when the body was cut short.
async fn diagnostic_body(response: reqwest::Response) -> Result<(Bytes, bool), reqwest::Error> {
    let mut body = BytesMut::new();
    let mut chunks = response.bytes_stream();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        let room = MAX_ERROR_BODY - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body.freeze(), true));
        }
        body.extend_from_slice(&chunk);
    }

    Ok((body.freeze(), false))
}

#[async_trait]
impl ImageHost for CloudinaryClient {
    async fn upload_image(
        &self,
        image: Bytes,
        image_id: &str,
    ) -> Result<UploadResponse, ImageHostError> {
        let mut params = BTreeMap::new();
        params.insert("public_id", image_id.to_string());
        params.insert("timestamp", chrono::Utc::now().timestamp().to_string());
        let signature = Self::sign(&params, &self.config.api_secret);

        let mut form = multipart::Form::new()
            .part("file", multipart::Part::stream(image).file_name(image_id.to_string()))
            .text("api_key", self.config.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", SIGNATURE_ALGORITHM);
        for (name, value) in params {
            form = form.text(name, value);
        }

        debug!(image_id = %image_id, url = %self.upload_url(), "Uploading image");

        let response = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::upload_error(image_id, e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::upload_error(image_id, e.to_string()))?;

        if !status.is_success() {
            let reason = match serde_json::from_slice::<CloudinaryErrorResponse>(&body) {
                Ok(error_response) => error_response.error.message,
                Err(_) => format!("{} {}", status, String::from_utf8_lossy(&body)),
            };
            return Err(Self::upload_error(image_id, reason));
        }

        let uploaded: UploadResponse = serde_json::from_slice(&body).map_err(|e| {
            Self::upload_error(image_id, format!("Failed to parse upload response: {}", e))
        })?;

        info!(image_id = %image_id, version = ?uploaded.version, "Image uploaded");
        Ok(uploaded)
    }

    async fn download_image(&self, image_id: &str) -> Result<ImageStream, ImageHostError> {
        let image_location = self.image_url(image_id)?;
        debug!(image_id = %image_id, url = %image_location, "Downloading image");

        let response = self
            .client
            .get(image_location)
            .send()
            .await
            .map_err(|e| Self::download_error(image_id, e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(response
                .bytes_stream()
                .map_err(std::io::Error::other)
                .boxed()),
            StatusCode::NOT_FOUND => {
                let err = ImageHostError::NotFound {
                    image_id: image_id.to_string(),
                };
                error!(image_id = %image_id, "{}", err);
                Err(err)
            }
            status => {
                // The body is diagnostic only; a failed read still reports the status.
                let detail = match diagnostic_body(response).await {
                    Ok((body, false)) => format!("{:?}", body),
                    Ok((body, true)) => format!("{:?} (truncated)", body),
                    Err(e) => format!("{} (body unavailable: {})", status, e),
                };
                Err(Self::download_error(image_id, detail))
            }
        }
    }
}
