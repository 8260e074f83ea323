//! Viewtrace Common Library
//!
//! Shared models, persistence and infrastructure for the Viewtrace
//! observation capture service.

pub mod accounts;
pub mod blob;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod observations;
pub mod region;
pub mod retry;
pub mod text;

// Re-export commonly used types
pub use accounts::{Account, AccountStore, BillingPeriod, NewAccount, Plan, SubscriptionStatus};
pub use blob::{BlobError, BlobStore, FsBlobStore, HttpBlobStore};
pub use db::Database;
pub use error::{Error, Result};
pub use lifecycle::{ObservationStatus, Transition};
pub use observations::{CaptureOutcome, Observation, ObservationStore, ResultStatus};
pub use retry::RetryPolicy;

/// Viewtrace version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default data directory
pub fn default_data_dir() -> std::path::PathBuf {
    std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".viewtrace")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_data_dir().join("viewtrace.db")
}
