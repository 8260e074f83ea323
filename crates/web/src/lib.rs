//! Viewtrace HTTP API
//!
//! Accounts, observation requests, lifecycle actions and comparisons, plus
//! the background capture queue they feed.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use config::Config;
pub use routes::router;
pub use state::{AppState, SharedState};
