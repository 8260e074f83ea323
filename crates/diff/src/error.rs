//! Error types for the comparison engines

use thiserror::Error;

/// Comparison errors
#[derive(Error, Debug)]
pub enum DiffError {
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode diff image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Image has no pixels")]
    EmptyImage,
}

/// Result type for comparisons
pub type DiffResult<T> = Result<T, DiffError>;
