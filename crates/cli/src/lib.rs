//! Viewtrace CLI
//!
//! Command-line client for a Viewtrace server, plus offline access to the
//! comparison engines.

pub mod client;
pub mod commands;
pub mod output;
