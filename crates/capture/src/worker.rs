//! Capture worker
//!
//! Processes one observation end to end: claim, launch a browser, render,
//! capture, upload and record the outcome. Every error is absorbed here
//! and turned into a `failed` status write; callers observe progress by
//! polling the observation.

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use viewtrace_common::text::normalize_whitespace;
use viewtrace_common::{
    BlobStore, CaptureOutcome, Observation, ObservationStatus, ObservationStore, ResultStatus,
    RetryPolicy,
};

use crate::browser::{BrowserLauncher, CaptureSession, EnvironmentProfile};
use crate::config::CaptureConfig;
use crate::error::{CaptureError, CaptureResult};

/// How processing one observation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    Failed,
    /// Cancelled at a checkpoint; nothing was written.
    Cancelled,
    /// The capture ran to the end but the observation was cancelled while
    /// it ran, so the completion did not apply.
    Discarded,
    /// Not pending when picked up.
    Skipped,
}

/// Rendered page content, before upload
struct CapturedPage {
    screenshot: Vec<u8>,
    text: Option<String>,
    title: Option<String>,
}

/// Drives a capture environment for one observation at a time
pub struct CaptureWorker {
    store: ObservationStore,
    blobs: Arc<dyn BlobStore>,
    launcher: Arc<dyn BrowserLauncher>,
    config: CaptureConfig,
    retry: RetryPolicy,
}

impl CaptureWorker {
    pub fn new(
        store: ObservationStore,
        blobs: Arc<dyn BlobStore>,
        launcher: Arc<dyn BrowserLauncher>,
        config: CaptureConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            blobs,
            launcher,
            config,
            retry,
        }
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }

    /// Process one observation.
    pub async fn process(&self, id: &str) -> ProcessOutcome {
        let observation = match self.persist("load observation", |store| store.get(id)).await {
            Ok(Some(observation)) => observation,
            Ok(None) => {
                warn!(observation_id = %id, "Observation not found; skipping");
                return ProcessOutcome::Skipped;
            }
            Err(e) => {
                error!(observation_id = %id, "Failed to load observation: {}", e);
                return ProcessOutcome::Skipped;
            }
        };

        match self.persist("claim observation", |store| store.claim(id)).await {
            Ok(true) => {
                info!(
                    observation_id = %id,
                    url = %observation.url,
                    region = %observation.region,
                    "Observation running"
                );
            }
            Ok(false) => {
                let status = match self.store.status(id) {
                    Ok(status) => status,
                    Err(e) => {
                        warn!(observation_id = %id, "Failed to read status after a lost claim: {}", e);
                        None
                    }
                };
                if status == Some(ObservationStatus::Cancelled) {
                    info!(observation_id = %id, "Observation cancelled before capture");
                    return ProcessOutcome::Cancelled;
                }
                debug!(observation_id = %id, status = ?status, "Observation not pending; skipping");
                return ProcessOutcome::Skipped;
            }
            Err(e) => {
                error!(observation_id = %id, "Failed to claim observation: {}", e);
                return ProcessOutcome::Skipped;
            }
        }

        match self.capture(&observation).await {
            Ok(outcome) => self.finish(&observation, outcome).await,
            Err(CaptureError::Cancelled) => ProcessOutcome::Cancelled,
            Err(e) => {
                match &e {
                    CaptureError::StorageMisconfigured(reason) => error!(
                        observation_id = %id,
                        "Artifact storage is misconfigured, captures cannot succeed until it is fixed: {}",
                        reason
                    ),
                    other => warn!(observation_id = %id, "Capture failed: {}", other),
                }
                self.fail(id, &e.to_string()).await;
                ProcessOutcome::Failed
            }
        }
    }

    /// Mark an observation failed through the retry policy. Returns whether
    /// the write applied.
    pub async fn fail(&self, id: &str, reason: &str) -> bool {
        match self
            .persist("mark observation failed", |store| store.fail(id, reason))
            .await
        {
            Ok(true) => {
                info!(observation_id = %id, reason = %reason, "Observation failed");
                true
            }
            Ok(false) => {
                debug!(observation_id = %id, "Observation left pending/running before the failure was recorded");
                false
            }
            Err(e) => {
                error!(observation_id = %id, "Failed to mark observation failed: {}", e);
                false
            }
        }
    }

    async fn capture(&self, observation: &Observation) -> CaptureResult<CaptureOutcome> {
        let id = observation.id.as_str();
        self.checkpoint(id, "before launch").await?;

        let profile = EnvironmentProfile::for_region(&observation.region, &self.config);
        let launch_timeout = self.config.launch_timeout();
        let session = match timeout(launch_timeout, self.launcher.launch(&profile)).await {
            Ok(Ok(session)) => session,
            Ok(Err(CaptureError::EnvironmentUnavailable(reason))) => {
                return Err(CaptureError::EnvironmentUnavailable(reason))
            }
            Ok(Err(e)) => return Err(CaptureError::EnvironmentUnavailable(e.to_string())),
            Err(_) => {
                return Err(CaptureError::EnvironmentUnavailable(format!(
                    "browser did not start within {:?}",
                    launch_timeout
                )))
            }
        };
        debug!(
            observation_id = %id,
            timezone = %profile.timezone,
            locale = %profile.locale,
            "Capture environment ready"
        );

        let rendered = self.render(observation, session.as_ref()).await;
        // Released before the upload, on success and failure alike.
        self.release(id, session).await;
        let page = rendered?;

        if let Some(title) = &page.title {
            debug!(observation_id = %id, title = %title, "Page rendered");
        }

        let result_status = ResultStatus::classify(page.screenshot.len(), page.text.as_deref());
        let key = format!("{}-{}.png", id, Utc::now().timestamp_millis());
        let upload_timeout = self.config.upload_timeout();
        let screenshot_ref = match timeout(
            upload_timeout,
            self.blobs.put(&key, Bytes::from(page.screenshot), "image/png"),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(CaptureError::Upload(format!(
                    "artifact upload did not finish within {:?}",
                    upload_timeout
                )))
            }
        };

        Ok(CaptureOutcome {
            screenshot_ref,
            text_content: page.text,
            result_status,
            captured_at: Utc::now(),
        })
    }

    async fn render(
        &self,
        observation: &Observation,
        session: &dyn CaptureSession,
    ) -> CaptureResult<CapturedPage> {
        let id = observation.id.as_str();
        self.checkpoint(id, "before navigation").await?;

        // Past this point a cancel no longer interrupts the capture.
        let navigation_timeout = self.config.navigation_timeout();
        match timeout(navigation_timeout, session.navigate(&observation.url, navigation_timeout)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(CaptureError::Navigation(format!(
                    "page did not reach DOM-ready within {:?}",
                    navigation_timeout
                )))
            }
        }
        tokio::time::sleep(self.config.settle_delay()).await;

        let screenshot_timeout = self.config.screenshot_timeout();
        let text_timeout = self.config.text_timeout();
        let (screenshot, text) = tokio::join!(
            timeout(
                screenshot_timeout,
                session.screenshot(self.config.full_page, screenshot_timeout)
            ),
            timeout(text_timeout, session.extract_text(text_timeout)),
        );

        let screenshot = match screenshot {
            Ok(result) => result?,
            Err(_) => {
                return Err(CaptureError::Capture(format!(
                    "screenshot did not finish within {:?}",
                    screenshot_timeout
                )))
            }
        };

        let (text, title) = match text {
            Ok(Ok(page)) => {
                let text = normalize_whitespace(&page.text);
                let title = normalize_whitespace(&page.title);
                (
                    Some(text).filter(|t| !t.is_empty()),
                    Some(title).filter(|t| !t.is_empty()),
                )
            }
            Ok(Err(e)) => {
                warn!(observation_id = %id, "Text extraction failed, continuing without text: {}", e);
                (None, None)
            }
            Err(_) => {
                warn!(
                    observation_id = %id,
                    "Text extraction did not finish within {:?}, continuing without text",
                    text_timeout
                );
                (None, None)
            }
        };

        Ok(CapturedPage {
            screenshot,
            text,
            title,
        })
    }

    /// Stop unless the observation is still ours to capture.
    async fn checkpoint(&self, id: &str, at: &str) -> CaptureResult<()> {
        let status = self
            .persist("check observation status", |store| store.status(id))
            .await?;
        match status {
            Some(ObservationStatus::Running) => Ok(()),
            Some(status) => {
                info!(observation_id = %id, status = %status, "Stopping {}: observation is no longer running", at);
                Err(CaptureError::Cancelled)
            }
            None => {
                warn!(observation_id = %id, "Stopping {}: observation no longer exists", at);
                Err(CaptureError::Cancelled)
            }
        }
    }

    /// Close the session within the grace period, abandoning it after that.
    async fn release(&self, id: &str, session: Box<dyn CaptureSession>) {
        let grace = self.config.close_grace();
        match timeout(grace, session.close()).await {
            Ok(Ok(())) => debug!(observation_id = %id, "Capture environment released"),
            Ok(Err(e)) => warn!(observation_id = %id, "Capture environment did not close cleanly: {}", e),
            Err(_) => warn!(
                observation_id = %id,
                "Capture environment did not close within {:?}; abandoning it",
                grace
            ),
        }
    }

    async fn finish(&self, observation: &Observation, outcome: CaptureOutcome) -> ProcessOutcome {
        let id = observation.id.as_str();
        match self
            .persist("complete observation", |store| store.complete(id, &outcome))
            .await
        {
            Ok(true) => {
                info!(
                    observation_id = %id,
                    result_status = %outcome.result_status,
                    screenshot_ref = %outcome.screenshot_ref,
                    "Observation completed"
                );
                ProcessOutcome::Completed
            }
            Ok(false) => {
                warn!(
                    observation_id = %id,
                    screenshot_ref = %outcome.screenshot_ref,
                    "Observation was cancelled during capture; artifact is orphaned"
                );
                ProcessOutcome::Discarded
            }
            Err(e) => {
                error!(observation_id = %id, "Failed to record completion: {}", e);
                self.fail(id, &format!("failed to record completion: {}", e))
                    .await;
                ProcessOutcome::Failed
            }
        }
    }

    /// Run a store operation under the retry policy.
    async fn persist<T, F>(&self, what: &str, op: F) -> viewtrace_common::Result<T>
    where
        F: Fn(&ObservationStore) -> viewtrace_common::Result<T>,
    {
        let store = &self.store;
        let op = &op;
        self.retry.run(what, move || async move { op(store) }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{fast_config, FakeBrowser, Harness};
    use std::time::Duration;
    use viewtrace_common::blob::{BlobError, BlobResult};

    #[tokio::test]
    async fn test_completes_with_all_result_fields() {
        let h = Harness::new();
        let id = h.create("https://example.com", &["US-CA"]).remove(0);
        let browser = FakeBrowser::rendering("  Example   Domain\n\n more  text ");

        let outcome = h.worker(&browser).process(&id).await;
        assert_eq!(outcome, ProcessOutcome::Completed);

        let obs = h.store.get(&id).unwrap().unwrap();
        assert_eq!(obs.status, ObservationStatus::Completed);
        assert_eq!(obs.result_status, Some(ResultStatus::Observed));
        assert_eq!(obs.text_content.as_deref(), Some("Example Domain more text"));
        assert!(obs.captured_at.is_some());

        let screenshot_ref = obs.screenshot_ref.unwrap();
        assert!(screenshot_ref.starts_with(&format!("http://localhost:8080/artifacts/{}-", id)));
        let key = h.blobs.key_for(&screenshot_ref).unwrap();
        assert_eq!(&h.blobs.read(&key).await.unwrap()[..], &browser.screenshot[..]);

        assert_eq!(browser.launched(), 1);
        assert_eq!(browser.closed(), 1);
        assert_eq!(browser.navigations(), vec!["https://example.com".to_string()]);
        assert_eq!(
            browser.stats.profiles.lock()[0].timezone,
            "America/Los_Angeles"
        );
    }

    #[tokio::test]
    async fn test_text_failure_degrades_instead_of_failing() {
        let h = Harness::new();
        let id = h.create("https://example.com", &["US-NY"]).remove(0);
        let mut browser = FakeBrowser::rendering("ignored");
        browser.fail_text = true;

        assert_eq!(h.worker(&browser).process(&id).await, ProcessOutcome::Completed);

        let obs = h.store.get(&id).unwrap().unwrap();
        assert_eq!(obs.status, ObservationStatus::Completed);
        assert_eq!(obs.text_content, None);
        assert_eq!(obs.result_status, Some(ResultStatus::NoIssues));
        assert!(obs.screenshot_ref.is_some());
    }

    #[tokio::test]
    async fn test_navigation_failure_marks_failed_and_releases() {
        let h = Harness::new();
        let id = h.create("https://unreachable.invalid", &["US-CA"]).remove(0);
        let mut browser = FakeBrowser::rendering("x");
        browser.fail_navigation = true;

        assert_eq!(h.worker(&browser).process(&id).await, ProcessOutcome::Failed);

        let obs = h.store.get(&id).unwrap().unwrap();
        assert_eq!(obs.status, ObservationStatus::Failed);
        assert!(!obs.has_results());
        assert!(obs
            .failure_reason
            .unwrap()
            .contains("ERR_CONNECTION_REFUSED"));
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_environment_unavailable() {
        let h = Harness::new();
        let id = h.create("https://example.com", &["US-CA"]).remove(0);
        let mut browser = FakeBrowser::rendering("x");
        browser.fail_launch = true;

        assert_eq!(h.worker(&browser).process(&id).await, ProcessOutcome::Failed);
        let obs = h.store.get(&id).unwrap().unwrap();
        assert_eq!(obs.status, ObservationStatus::Failed);
        assert!(obs
            .failure_reason
            .unwrap()
            .starts_with("Capture environment unavailable"));
    }

    #[tokio::test]
    async fn test_launch_timeout_is_environment_unavailable() {
        let h = Harness::new();
        let id = h.create("https://example.com", &["US-CA"]).remove(0);
        let mut browser = FakeBrowser::rendering("x");
        browser.launch_delay = Duration::from_secs(5);
        let config = CaptureConfig {
            launch_timeout_ms: 50,
            ..fast_config()
        };

        let outcome = h.worker_with(&browser, config).process(&id).await;
        assert_eq!(outcome, ProcessOutcome::Failed);
        let reason = h.store.get(&id).unwrap().unwrap().failure_reason.unwrap();
        assert!(reason.contains("did not start within"));
        assert_eq!(browser.launched(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_claim_is_left_alone() {
        let h = Harness::new();
        let id = h.create("https://example.com", &["US-CA"]).remove(0);
        h.store.cancel(&id, &h.owner).unwrap();
        let browser = FakeBrowser::rendering("x");

        assert_eq!(h.worker(&browser).process(&id).await, ProcessOutcome::Cancelled);
        assert_eq!(browser.launched(), 0);
        assert_eq!(
            h.store.status(&id).unwrap(),
            Some(ObservationStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_cancel_during_launch_stops_before_navigation() {
        let h = Harness::new();
        let id = h.create("https://example.com", &["US-CA"]).remove(0);
        let mut browser = FakeBrowser::rendering("x");
        let (store, target, owner) = (h.store.clone(), id.clone(), h.owner.clone());
        browser.on_launch = Some(Arc::new(move || {
            store.cancel(&target, &owner).unwrap();
        }));

        assert_eq!(h.worker(&browser).process(&id).await, ProcessOutcome::Cancelled);

        assert!(browser.navigations().is_empty());
        assert_eq!(browser.closed(), 1);
        let obs = h.store.get(&id).unwrap().unwrap();
        assert_eq!(obs.status, ObservationStatus::Cancelled);
        assert!(obs.failure_reason.is_none());
    }

    #[tokio::test]
    async fn test_cancel_after_navigation_starts_keeps_cancelled() {
        let h = Harness::new();
        let id = h.create("https://example.com", &["US-CA"]).remove(0);
        let mut browser = FakeBrowser::rendering("late");
        let (store, target, owner) = (h.store.clone(), id.clone(), h.owner.clone());
        browser.on_navigate = Some(Arc::new(move || {
            store.cancel(&target, &owner).unwrap();
        }));

        assert_eq!(h.worker(&browser).process(&id).await, ProcessOutcome::Discarded);

        let obs = h.store.get(&id).unwrap().unwrap();
        assert_eq!(obs.status, ObservationStatus::Cancelled);
        assert!(!obs.has_results());
    }

    #[tokio::test]
    async fn test_hanging_close_is_abandoned() {
        let h = Harness::new();
        let id = h.create("https://example.com", &["US-CA"]).remove(0);
        let mut browser = FakeBrowser::rendering("text");
        browser.hang_close = true;

        assert_eq!(h.worker(&browser).process(&id).await, ProcessOutcome::Completed);
        assert_eq!(browser.closed(), 0);
    }

    #[tokio::test]
    async fn test_missing_storage_container_fails_distinctly() {
        let h = Harness::new();
        let id = h.create("https://example.com", &["US-CA"]).remove(0);
        std::fs::remove_dir_all(h.blobs.root()).unwrap();
        let browser = FakeBrowser::rendering("text");

        assert_eq!(h.worker(&browser).process(&id).await, ProcessOutcome::Failed);
        let obs = h.store.get(&id).unwrap().unwrap();
        assert!(obs
            .failure_reason
            .unwrap()
            .starts_with("Storage misconfigured"));
        assert_eq!(browser.closed(), 1);
    }

    struct StalledBlobStore;

    #[async_trait::async_trait]
    impl BlobStore for StalledBlobStore {
        async fn put(&self, _key: &str, _bytes: Bytes, _content_type: &str) -> BlobResult<String> {
            futures::future::pending().await
        }

        async fn fetch(&self, public_ref: &str) -> BlobResult<Bytes> {
            Err(BlobError::NotFound(public_ref.to_string()))
        }
    }

    #[tokio::test]
    async fn test_stalled_upload_times_out_as_upload_failure() {
        let h = Harness::new();
        let id = h.create("https://example.com", &["US-CA"]).remove(0);
        let browser = FakeBrowser::rendering("text");
        let config = CaptureConfig {
            upload_timeout_ms: 50,
            ..fast_config()
        };
        let worker = CaptureWorker::new(
            h.store.clone(),
            Arc::new(StalledBlobStore),
            Arc::new(browser.clone()),
            config,
            RetryPolicy::none(),
        );

        let outcome = tokio::time::timeout(Duration::from_secs(5), worker.process(&id))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Failed);

        let obs = h.store.get(&id).unwrap().unwrap();
        assert_eq!(obs.status, ObservationStatus::Failed);
        assert!(obs
            .failure_reason
            .unwrap()
            .starts_with("Artifact upload failed"));
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test]
    async fn test_block_separated_text_keeps_word_boundaries() {
        let h = Harness::new();
        let id = h.create("https://example.com", &["US-CA"]).remove(0);
        // Rendered text of <li>Home</li><li>About</li> arrives line-separated.
        let browser = FakeBrowser::rendering("Home\nAbout\n\tPricing");

        assert_eq!(h.worker(&browser).process(&id).await, ProcessOutcome::Completed);
        let obs = h.store.get(&id).unwrap().unwrap();
        assert_eq!(obs.text_content.as_deref(), Some("Home About Pricing"));
    }

    #[tokio::test]
    async fn test_completed_observation_is_skipped() {
        let h = Harness::new();
        let id = h.create("https://example.com", &["US-CA"]).remove(0);
        let browser = FakeBrowser::rendering("text");
        let worker = h.worker(&browser);

        assert_eq!(worker.process(&id).await, ProcessOutcome::Completed);
        assert_eq!(worker.process(&id).await, ProcessOutcome::Skipped);
        assert_eq!(browser.launched(), 1);
    }
}
