//! Capture environment seam
//!
//! A [`BrowserLauncher`] starts one isolated browser session per
//! observation. The worker only talks to these traits, so tests drive it
//! with in-memory fakes and production uses the Playwright driver.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use viewtrace_common::region;

use crate::config::CaptureConfig;
use crate::error::CaptureResult;

/// Settings a capture environment is created with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentProfile {
    pub locale: String,
    pub timezone: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl EnvironmentProfile {
    /// Profile for a region code; unknown codes get the default timezone.
    pub fn for_region(region_code: &str, config: &CaptureConfig) -> Self {
        let settings = region::resolve(region_code);
        Self {
            locale: settings.locale.to_string(),
            timezone: settings.timezone.to_string(),
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
        }
    }
}

/// Visible text and title of a rendered page
#[derive(Debug, Clone, Default)]
pub struct PageText {
    /// Raw text; the worker collapses whitespace
    pub text: String,
    pub title: String,
}

/// Starts capture environments
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Start a browser configured with `profile`. Returns once the session
    /// can accept commands.
    async fn launch(&self, profile: &EnvironmentProfile) -> CaptureResult<Box<dyn CaptureSession>>;
}

/// One running capture environment, exclusively owned by the task
/// processing a single observation.
///
/// Methods take `&self` so the screenshot and text extraction can run
/// concurrently against the same page.
#[async_trait]
pub trait CaptureSession: Send + Sync {
    /// Navigate and wait for DOM-ready.
    async fn navigate(&self, url: &str, timeout: Duration) -> CaptureResult<()>;

    /// PNG screenshot of the current page.
    async fn screenshot(&self, full_page: bool, timeout: Duration) -> CaptureResult<Vec<u8>>;

    /// Rendered visible text of the body, plus the title.
    async fn extract_text(&self, timeout: Duration) -> CaptureResult<PageText>;

    /// Release the environment.
    async fn close(&self) -> CaptureResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_uses_region_timezone() {
        let config = CaptureConfig::default();
        let profile = EnvironmentProfile::for_region("US-CA", &config);
        assert_eq!(profile.timezone, "America/Los_Angeles");
        assert_eq!(profile.viewport_width, 1920);
        assert_eq!(profile.viewport_height, 1080);

        let fallback = EnvironmentProfile::for_region("XX-NOWHERE", &config);
        assert_eq!(fallback.timezone, region::DEFAULT_TIMEZONE);
        assert_eq!(fallback.locale, region::DEFAULT_LOCALE);
    }
}
