use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use tracing::{debug, info};

use crate::models::{AppState, NewImageResponse};
use crate::types::{AppError, AppResult};

/// Multipart field carrying the uploaded image
const DATA_FIELD: &str = "data";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/image", post(post_image))
        .route("/image/{image_id}", get(get_image))
        .with_state(state)
}

/// POST /image - store the uploaded file and return its identifier
async fn post_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<NewImageResponse>> {
    let image = read_data_field(&mut multipart).await?;
    info!(size = image.len(), "Image upload request received");

    let image_id = state.images.new_image(image).await?;

    Ok(Json(NewImageResponse { image_id }))
}

/// GET /image/{image_id} - stream the stored image
async fn get_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> AppResult<Response> {
    let stream = state.images.download_image(&image_id).await?;

    Ok((
        [(header::CONTENT_TYPE, mime::IMAGE_JPEG.as_ref())],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn read_data_field(multipart: &mut Multipart) -> AppResult<Bytes> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidRequest(e.body_text()))?
    {
        if field.name() != Some(DATA_FIELD) {
            debug!(field = ?field.name(), "Skipping multipart field");
            continue;
        }

        return field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidRequest(e.body_text()));
    }

    Err(AppError::InvalidRequest(format!(
        "Missing multipart field '{}'",
        DATA_FIELD
    )))
}
