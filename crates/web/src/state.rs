//! Shared application state

use std::sync::Arc;
use viewtrace_capture::CaptureQueue;
use viewtrace_common::{AccountStore, BlobStore, Database, FsBlobStore, ObservationStore};
use viewtrace_diff::{TextDiffEngine, VisualDiffEngine};

use crate::config::BillingConfig;

/// State shared by every handler
pub struct AppState {
    pub accounts: AccountStore,
    pub observations: ObservationStore,
    /// Where screenshots and overlays are stored
    pub blobs: Arc<dyn BlobStore>,
    /// Set when artifacts live on local disk and are served by `/artifacts`
    pub local_artifacts: Option<FsBlobStore>,
    pub queue: CaptureQueue,
    pub billing: BillingConfig,
    pub visual: VisualDiffEngine,
    pub text: TextDiffEngine,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        db: Database,
        blobs: Arc<dyn BlobStore>,
        local_artifacts: Option<FsBlobStore>,
        queue: CaptureQueue,
        billing: BillingConfig,
    ) -> Self {
        Self {
            accounts: AccountStore::new(db.clone()),
            observations: ObservationStore::new(db),
            blobs,
            local_artifacts,
            queue,
            billing,
            visual: VisualDiffEngine::default(),
            text: TextDiffEngine::default(),
        }
    }
}
