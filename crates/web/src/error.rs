//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;
use viewtrace_common::Error as CoreError;

/// Errors surfaced to API callers as `{"error": "..."}`
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),

    /// Missing and not-owned resources look the same.
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// Quota exhausted or subscription inactive
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    /// Details go to the log, never to the caller.
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Log `err` and return a generic 500.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        error!("Request failed: {}", err);
        ApiError::Internal
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            CoreError::Precondition { .. }
            | CoreError::InvalidStateTransition { .. }
            | CoreError::InvalidInput(_) => ApiError::BadRequest(err.to_string()),
            CoreError::QuotaExceeded(reason) => ApiError::Forbidden(reason),
            CoreError::AlreadyExists { .. } => ApiError::Conflict(err.to_string()),
            other => ApiError::internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use viewtrace_common::ObservationStatus;

    #[test]
    fn test_core_errors_map_to_statuses() {
        let precondition: ApiError = CoreError::Precondition {
            action: "cancel",
            status: ObservationStatus::Completed,
        }
        .into();
        assert_eq!(precondition.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            precondition.to_string(),
            "Cannot cancel observation with status: completed"
        );

        let missing: ApiError = CoreError::not_found("Observation", "abc").into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.to_string(), "Observation not found");

        let quota: ApiError = CoreError::QuotaExceeded("limit reached".into()).into();
        assert_eq!(quota.status(), StatusCode::FORBIDDEN);

        let internal: ApiError = CoreError::Internal("disk on fire".into()).into();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.to_string(), "Internal server error");
    }
}
