// Error types shared by the HTTP and RPC surfaces

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::storage::ImageHostError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Host(#[from] ImageHostError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Host(e) => e.kind(),
            AppError::InvalidRequest(_) => "InvalidRequest",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Host(ImageHostError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Host(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Plain-text error bodies: the message alone for a missing image,
/// `Error: <Kind>: <message>` for anything that is the server's fault.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}: {}", self.kind(), self);
            format!("Error: {}: {}\n", self.kind(), self)
        } else {
            self.to_string()
        };

        (status, body).into_response()
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
