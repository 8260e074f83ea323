//! Error types for the capture pipeline

use thiserror::Error;
use viewtrace_common::BlobError;

/// Capture errors. Every variant except `Cancelled` ends with the
/// observation marked failed.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    /// The storage container is missing; nothing succeeds until an operator
    /// fixes the configuration.
    #[error("Storage misconfigured: {0}")]
    StorageMisconfigured(String),

    #[error("Artifact upload failed: {0}")]
    Upload(String),

    #[error("Browser driver error: {0}")]
    Browser(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] viewtrace_common::Error),

    #[error("Observation is no longer running")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<BlobError> for CaptureError {
    fn from(err: BlobError) -> Self {
        if err.is_misconfiguration() {
            CaptureError::StorageMisconfigured(err.to_string())
        } else {
            CaptureError::Upload(err.to_string())
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_container_is_misconfiguration() {
        let err: CaptureError = BlobError::ContainerNotFound("screenshots".into()).into();
        assert!(matches!(err, CaptureError::StorageMisconfigured(_)));

        let err: CaptureError = BlobError::Status {
            status: 503,
            body: "unavailable".into(),
        }
        .into();
        assert!(matches!(err, CaptureError::Upload(_)));
    }
}
