//! Error types for Viewtrace

use thiserror::Error;

use crate::blob::BlobError;
use crate::lifecycle::{ObservationStatus, Transition};

/// Result type alias using Viewtrace Error
pub type Result<T> = std::result::Result<T, Error>;

/// Viewtrace error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Blob(#[from] BlobError),

    /// Covers both "does not exist" and "exists but belongs to someone else".
    #[error("{kind} not found")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Cannot {action} observation with status: {status}")]
    Precondition {
        action: &'static str,
        status: ObservationStatus,
    },

    #[error("Invalid state transition: {from} -> {to:?}")]
    InvalidStateTransition {
        from: ObservationStatus,
        to: Transition,
    },

    #[error("{0}")]
    QuotaExceeded(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: &str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.into(),
        }
    }
}
