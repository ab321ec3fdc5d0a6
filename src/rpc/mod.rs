//! Internal RPC surface
//!
//! Lets other services call the image service's operations directly instead
//! of going through the public HTTP endpoints. Calls are JSON documents
//! posted to `/rpc/{service}`:
//!
//! ```text
//! {"method": "new_image",      "args": {"image": "<base64 bytes>"}}
//! {"method": "download_image", "args": {"image_id": "<id>"}}
//! ```
//!
//! Unlike the public endpoints, failures are not translated: the response
//! carries the host error's kind and message as-is. Image bytes travel
//! base64-encoded, so downloads over RPC are buffered.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::models::AppState;
use crate::service::ImageService;
use crate::storage::ImageHostError;
use crate::types::{AppError, AppResult};

// =============================================================================
// RPC Input/Output Types
// =============================================================================

/// An operation of the image service and its arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum RpcCall {
    NewImage { image: String },
    DownloadImage { image_id: String },
}

impl RpcCall {
    pub fn method_name(&self) -> &'static str {
        match self {
            RpcCall::NewImage { .. } => "new_image",
            RpcCall::DownloadImage { .. } => "download_image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,

    pub execution_time_ms: u64,
}

impl RpcResponse {
    fn success(result: serde_json::Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            execution_time_ms,
        }
    }

    fn error(kind: impl Into<String>, message: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(RpcError {
                kind: kind.into(),
                message: message.into(),
            }),
            execution_time_ms,
        }
    }
}

// =============================================================================
// RPC Router
// =============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rpc/{service}", post(handle_rpc))
        .with_state(state)
}

async fn handle_rpc(
    State(state): State<AppState>,
    Path(service): Path<String>,
    call: Result<Json<RpcCall>, JsonRejection>,
) -> impl IntoResponse {
    let start = std::time::Instant::now();

    if service != state.config.service.name {
        warn!("RPC call for unknown service: {}", service);
        return (
            StatusCode::NOT_FOUND,
            Json(RpcResponse::error(
                "UnknownService",
                format!("No such service: {}", service),
                start.elapsed().as_millis() as u64,
            )),
        );
    }

    let call = match call {
        Ok(Json(call)) => call,
        Err(rejection) => {
            warn!("Malformed RPC call: {}", rejection.body_text());
            return (
                rejection.status(),
                Json(RpcResponse::error(
                    "InvalidRequest",
                    rejection.body_text(),
                    start.elapsed().as_millis() as u64,
                )),
            );
        }
    };

    info!("RPC call: {}.{}", service, call.method_name());

    match dispatch(&state.images, call).await {
        Ok(value) => (
            StatusCode::OK,
            Json(RpcResponse::success(value, start.elapsed().as_millis() as u64)),
        ),
        Err(e) => {
            error!("RPC execution error: {}: {}", e.kind(), e);
            let status = match e {
                AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                AppError::Host(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(RpcResponse::error(e.kind(), e.to_string(), start.elapsed().as_millis() as u64)),
            )
        }
    }
}

/// Run one call against the service
pub async fn dispatch(images: &ImageService, call: RpcCall) -> AppResult<serde_json::Value> {
    match call {
        RpcCall::NewImage { image } => {
            let data = STANDARD
                .decode(image)
                .map_err(|e| AppError::InvalidRequest(format!("image is not valid base64: {}", e)))?;
            let image_id = images.new_image(Bytes::from(data)).await?;
            Ok(serde_json::Value::String(image_id))
        }

        RpcCall::DownloadImage { image_id } => {
            let chunks: Vec<Bytes> = images
                .download_image(&image_id)
                .await?
                .try_collect()
                .await
                .map_err(|e| ImageHostError::Download {
                    image_id: image_id.clone(),
                    detail: e.to_string(),
                })?;
            Ok(serde_json::Value::String(STANDARD.encode(chunks.concat())))
        }
    }
}

// =============================================================================
// Client Helpers
// =============================================================================

/// Client for services calling the image service over RPC
pub mod client {
    use super::*;

    pub struct RpcClient {
        client: reqwest::Client,
        base_url: String,
        service: String,
    }

    impl RpcClient {
        pub fn new(base_url: impl Into<String>, service: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                base_url: base_url.into(),
                service: service.into(),
            }
        }

        pub async fn new_image(&self, image: &[u8]) -> Result<String, RpcClientError> {
            let result = self
                .call(&RpcCall::NewImage {
                    image: STANDARD.encode(image),
                })
                .await?;

            result
                .as_str()
                .map(String::from)
                .ok_or_else(|| RpcClientError::InvalidResponse("expected an image id".to_string()))
        }

        pub async fn download_image(&self, image_id: &str) -> Result<Bytes, RpcClientError> {
            let result = self
                .call(&RpcCall::DownloadImage {
                    image_id: image_id.to_string(),
                })
                .await?;

            let encoded = result
                .as_str()
                .ok_or_else(|| RpcClientError::InvalidResponse("expected base64 image".to_string()))?;
            STANDARD
                .decode(encoded)
                .map(Bytes::from)
                .map_err(|e| RpcClientError::InvalidResponse(e.to_string()))
        }

        async fn call(&self, call: &RpcCall) -> Result<serde_json::Value, RpcClientError> {
            let response = self
                .client
                .post(format!(
                    "{}/rpc/{}",
                    self.base_url.trim_end_matches('/'),
                    self.service
                ))
                .json(call)
                .send()
                .await
                .map_err(|e| RpcClientError::Network(e.to_string()))?;

            let rpc_response: RpcResponse = response
                .json()
                .await
                .map_err(|e| RpcClientError::InvalidResponse(e.to_string()))?;

            if rpc_response.success {
                rpc_response.result.ok_or(RpcClientError::NoResult)
            } else {
                let error = rpc_response.error.unwrap_or_else(|| RpcError {
                    kind: "Unknown".to_string(),
                    message: "Unknown error".to_string(),
                });
                Err(RpcClientError::Remote {
                    kind: error.kind,
                    message: error.message,
                })
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    pub enum RpcClientError {
        #[error("Network error: {0}")]
        Network(String),

        #[error("Invalid response: {0}")]
        InvalidResponse(String),

        #[error("{kind}: {message}")]
        Remote { kind: String, message: String },

        #[error("No result returned")]
        NoResult,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::client::{RpcClient, RpcClientError};
    use super::*;
    use crate::routes::testing::test_router;
    use crate::service::testing::FakeHost;
    use axum::body::Body;
    use axum::http::{header, Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn rpc_request(service: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(format!("/rpc/{}", service))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn rpc_response(response: axum::response::Response) -> RpcResponse {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_rpc_call_wire_format() {
        let call: RpcCall = serde_json::from_value(serde_json::json!({
            "method": "download_image",
            "args": {"image_id": "abc123"}
        }))
        .unwrap();

        assert_eq!(call.method_name(), "download_image");
        assert!(matches!(call, RpcCall::DownloadImage { ref image_id } if image_id == "abc123"));
    }

    #[tokio::test]
    async fn test_new_image_over_rpc() {
        let host = Arc::new(FakeHost::default());
        let app = test_router(host.clone());

        let response = app
            .oneshot(rpc_request(
                "image_service",
                serde_json::json!({"method": "new_image", "args": {"image": STANDARD.encode(b"foo")}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let rpc = rpc_response(response).await;
        assert!(rpc.success);
        assert_eq!(rpc.result, Some(serde_json::Value::String(host.uploaded_ids()[0].clone())));
    }

    #[tokio::test]
    async fn test_download_image_over_rpc() {
        let app = test_router(Arc::new(FakeHost::with_image("abc123", b"foo")));

        let response = app
            .oneshot(rpc_request(
                "image_service",
                serde_json::json!({"method": "download_image", "args": {"image_id": "abc123"}}),
            ))
            .await
            .unwrap();

        let rpc = rpc_response(response).await;
        assert_eq!(rpc.result, Some(serde_json::Value::String(STANDARD.encode(b"foo"))));
    }

    #[tokio::test]
    async fn test_errors_are_not_translated() {
        let app = test_router(Arc::new(FakeHost::default()));

        let response = app
            .oneshot(rpc_request(
                "image_service",
                serde_json::json!({"method": "download_image", "args": {"image_id": "abc123"}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let rpc = rpc_response(response).await;
        assert!(!rpc.success);
        assert_eq!(
            rpc.error,
            Some(RpcError {
                kind: "ImageNotFound".to_string(),
                message: "Image abc123 not found".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_base64() {
        let host = Arc::new(FakeHost::default());
        let app = test_router(host.clone());

        let response = app
            .oneshot(rpc_request(
                "image_service",
                serde_json::json!({"method": "new_image", "args": {"image": "not base64!"}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(rpc_response(response).await.error.unwrap().kind, "InvalidRequest");
        assert!(host.uploaded_ids().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_call_uses_envelope() {
        let host = Arc::new(FakeHost::default());
        let app = test_router(host.clone());

        let response = app
            .oneshot(
                Request::post("/rpc/image_service")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let rpc = rpc_response(response).await;
        assert!(!rpc.success);
        assert_eq!(rpc.error.unwrap().kind, "InvalidRequest");
        assert!(host.uploaded_ids().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_method_uses_envelope() {
        let app = test_router(Arc::new(FakeHost::default()));

        let response = app
            .oneshot(rpc_request(
                "image_service",
                serde_json::json!({"method": "delete_image", "args": {"image_id": "abc123"}}),
            ))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        assert_eq!(rpc_response(response).await.error.unwrap().kind, "InvalidRequest");
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let app = test_router(Arc::new(FakeHost::default()));

        let response = app
            .oneshot(rpc_request(
                "other_service",
                serde_json::json!({"method": "download_image", "args": {"image_id": "abc123"}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_client_new_image() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rpc/image_service")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "method": "new_image",
                "args": {"image": STANDARD.encode(b"foo")}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "result": "abc123", "execution_time_ms": 3}"#)
            .create_async()
            .await;

        let client = RpcClient::new(server.url(), "image_service");
        assert_eq!(client.new_image(b"foo").await.unwrap(), "abc123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_surfaces_remote_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/rpc/image_service")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"success": false, "error": {"kind": "ImageNotFound", "message": "Image abc123 not found"}, "execution_time_ms": 1}"#,
            )
            .create_async()
            .await;

        let client = RpcClient::new(server.url(), "image_service");
        let err = client.download_image("abc123").await.unwrap_err();

        assert!(matches!(
            err,
            RpcClientError::Remote { ref kind, .. } if kind == "ImageNotFound"
        ));
        assert_eq!(err.to_string(), "ImageNotFound: Image abc123 not found");
    }
}
