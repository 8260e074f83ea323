//! In-memory browser used by the worker, queue and reconciler tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use viewtrace_common::{
    AccountStore, Database, FsBlobStore, NewAccount, ObservationStore, RetryPolicy,
};

use crate::browser::{BrowserLauncher, CaptureSession, EnvironmentProfile, PageText};
use crate::config::CaptureConfig;
use crate::error::{CaptureError, CaptureResult};
use crate::worker::CaptureWorker;

pub(crate) type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct FakeStats {
    pub launched: AtomicUsize,
    pub closed: AtomicUsize,
    pub navigations: parking_lot::Mutex<Vec<String>>,
    pub profiles: parking_lot::Mutex<Vec<EnvironmentProfile>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeBrowser {
    pub fail_launch: bool,
    pub launch_delay: Duration,
    pub fail_navigation: bool,
    pub panic_url: Option<String>,
    pub fail_text: bool,
    pub hang_close: bool,
    pub text: String,
    pub screenshot: Vec<u8>,
    pub on_launch: Option<Hook>,
    pub on_navigate: Option<Hook>,
    pub stats: Arc<FakeStats>,
}

impl FakeBrowser {
    pub fn rendering(text: &str) -> Self {
        Self {
            text: text.to_string(),
            screenshot: vec![0x89, b'P', b'N', b'G', 1, 2, 3],
            ..Default::default()
        }
    }

    pub fn launched(&self) -> usize {
        self.stats.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.stats.navigations.lock().clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn launch(&self, profile: &EnvironmentProfile) -> CaptureResult<Box<dyn CaptureSession>> {
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        if let Some(hook) = &self.on_launch {
            hook();
        }
        if self.fail_launch {
            return Err(CaptureError::Browser("no browser installed".to_string()));
        }
        self.stats.launched.fetch_add(1, Ordering::SeqCst);
        self.stats.profiles.lock().push(profile.clone());
        Ok(Box::new(FakeSession {
            browser: self.clone(),
        }))
    }
}

struct FakeSession {
    browser: FakeBrowser,
}

#[async_trait]
impl CaptureSession for FakeSession {
    async fn navigate(&self, url: &str, _timeout: Duration) -> CaptureResult<()> {
        self.browser.stats.navigations.lock().push(url.to_string());
        if let Some(hook) = &self.browser.on_navigate {
            hook();
        }
        if self.browser.panic_url.as_deref() == Some(url) {
            panic!("renderer crashed on {}", url);
        }
        if self.browser.fail_navigation {
            return Err(CaptureError::Navigation(
                "net::ERR_CONNECTION_REFUSED".to_string(),
            ));
        }
        Ok(())
    }

    async fn screenshot(&self, _full_page: bool, _timeout: Duration) -> CaptureResult<Vec<u8>> {
        Ok(self.browser.screenshot.clone())
    }

    async fn extract_text(&self, _timeout: Duration) -> CaptureResult<PageText> {
        if self.browser.fail_text {
            return Err(CaptureError::Capture("evaluate timed out".to_string()));
        }
        Ok(PageText {
            text: self.browser.text.clone(),
            title: "Example".to_string(),
        })
    }

    async fn close(&self) -> CaptureResult<()> {
        if self.browser.hang_close {
            futures::future::pending::<()>().await;
        }
        self.browser.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct Harness {
    pub db: Database,
    pub store: ObservationStore,
    pub owner: String,
    pub blobs: Arc<FsBlobStore>,
    pub _tmp: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let db = Database::open_memory().unwrap();
        let (account, _) = AccountStore::new(db.clone())
            .create(
                &NewAccount {
                    email: "owner@example.com".into(),
                    name: "Owner".into(),
                    plan: Default::default(),
                    billing_period: Default::default(),
                },
                true,
            )
            .unwrap();
        let tmp = tempfile::TempDir::new().unwrap();
        let blobs = Arc::new(FsBlobStore::new(tmp.path(), "http://localhost:8080/artifacts"));
        Self {
            store: ObservationStore::new(db.clone()),
            db,
            owner: account.id,
            blobs,
            _tmp: tmp,
        }
    }

    pub fn create(&self, url: &str, regions: &[&str]) -> Vec<String> {
        let regions: Vec<String> = regions.iter().map(|r| r.to_string()).collect();
        self.store
            .create_batch(&self.owner, url, &regions)
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect()
    }

    pub fn worker(&self, browser: &FakeBrowser) -> CaptureWorker {
        self.worker_with(browser, fast_config())
    }

    pub fn worker_with(&self, browser: &FakeBrowser, config: CaptureConfig) -> CaptureWorker {
        CaptureWorker::new(
            self.store.clone(),
            self.blobs.clone(),
            Arc::new(browser.clone()),
            config,
            RetryPolicy::none(),
        )
    }
}

pub(crate) fn fast_config() -> CaptureConfig {
    CaptureConfig {
        launch_timeout_ms: 500,
        navigation_timeout_ms: 500,
        settle_delay_ms: 0,
        screenshot_timeout_ms: 500,
        text_timeout_ms: 500,
        upload_timeout_ms: 500,
        close_grace_ms: 50,
        ..Default::default()
    }
}
