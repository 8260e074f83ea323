//! Viewtrace capture pipeline
//!
//! - [`browser`]: the capture environment seam
//! - [`playwright`]: the Node.js/Playwright implementation of that seam
//! - [`worker`]: processes one observation end to end
//! - [`queue`]: supervised batches of observations
//! - [`reconciler`]: requeues work lost to restarts and crashes

pub mod browser;
pub mod config;
pub mod error;
pub mod playwright;
pub mod queue;
pub mod reconciler;
pub mod worker;

#[cfg(test)]
mod fake;

pub use browser::{BrowserLauncher, CaptureSession, EnvironmentProfile, PageText};
pub use config::{Browser, CaptureConfig, QueueConfig, ReconcilerConfig};
pub use error::{CaptureError, CaptureResult};
pub use playwright::PlaywrightLauncher;
pub use queue::CaptureQueue;
pub use reconciler::{Reconciler, SweepReport};
pub use worker::{CaptureWorker, ProcessOutcome};
