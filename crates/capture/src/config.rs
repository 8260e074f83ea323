//! Capture, queue and reconciler configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Browser engine the Playwright driver launches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Capture environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Node.js binary used to run the browser driver
    pub node_binary: String,

    /// Directory holding the Playwright `node_modules`, exported as NODE_PATH
    pub node_path: Option<PathBuf>,

    pub browser: Browser,

    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Capture the whole scrollable page rather than the viewport
    pub full_page: bool,

    pub launch_timeout_ms: u64,

    /// Bound for reaching DOM-ready
    pub navigation_timeout_ms: u64,

    /// Fixed wait after DOM-ready before capturing
    pub settle_delay_ms: u64,

    pub screenshot_timeout_ms: u64,
    pub text_timeout_ms: u64,

    /// Bound for storing the screenshot artifact
    pub upload_timeout_ms: u64,

    /// How long closing the browser may take before it is abandoned
    pub close_grace_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            node_binary: "node".to_string(),
            node_path: None,
            browser: Browser::default(),
            viewport_width: 1920,
            viewport_height: 1080,
            full_page: true,
            launch_timeout_ms: 30_000,
            navigation_timeout_ms: 30_000,
            settle_delay_ms: 1_500,
            screenshot_timeout_ms: 15_000,
            text_timeout_ms: 15_000,
            upload_timeout_ms: 30_000,
            close_grace_ms: 5_000,
        }
    }
}

impl CaptureConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn screenshot_timeout(&self) -> Duration {
        Duration::from_millis(self.screenshot_timeout_ms)
    }

    pub fn text_timeout(&self) -> Duration {
        Duration::from_millis(self.text_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Capture queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Batches processed at the same time. Items within a batch are always
    /// sequential.
    pub max_concurrent_batches: usize,

    /// Batches that may wait in the channel
    pub channel_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 2,
            channel_capacity: 256,
        }
    }
}

/// Stale-observation sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub sweep_interval_secs: u64,

    /// A `running` observation untouched for this long is requeued
    pub stale_after_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            stale_after_secs: 600,
        }
    }
}

impl ReconcilerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: CaptureConfig =
            serde_json::from_str(r#"{"browser": "firefox", "settle_delay_ms": 0}"#).unwrap();
        assert_eq!(config.browser, Browser::Firefox);
        assert_eq!(config.settle_delay(), Duration::ZERO);
        assert_eq!(config.viewport_width, 1920);
        assert_eq!(config.launch_timeout(), Duration::from_secs(30));
        assert_eq!(config.upload_timeout(), Duration::from_secs(30));
    }
}
