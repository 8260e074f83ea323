//! Public artifact serving for the filesystem storage backend

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use viewtrace_common::BlobError;

use crate::error::ApiError;
use crate::state::SharedState;

pub async fn serve(State(state): State<SharedState>, Path(key): Path<String>) -> Response {
    let Some(store) = &state.local_artifacts else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    match store.read(&key).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&key).first_or_octet_stream();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime.as_ref()),
                    (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
                ],
                bytes,
            )
                .into_response()
        }
        Err(BlobError::NotFound(_)) | Err(BlobError::InvalidKey(_)) => {
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
        Err(e) => ApiError::internal(e).into_response(),
    }
}
