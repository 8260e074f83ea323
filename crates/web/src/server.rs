//! Server assembly
//!
//! Opens the database, picks the storage backend, starts the capture queue
//! and reconciler, then serves the API until `shutdown` fires.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use viewtrace_capture::{CaptureQueue, CaptureWorker, PlaywrightLauncher, Reconciler};
use viewtrace_common::{BlobStore, Database, FsBlobStore, HttpBlobStore, ObservationStore};

use crate::config::{Config, StorageConfig};
use crate::routes::router;
use crate::state::AppState;

/// Build the configured storage backend. The filesystem backend's root is
/// created here, once, at startup.
pub async fn storage(
    config: &StorageConfig,
) -> anyhow::Result<(Arc<dyn BlobStore>, Option<FsBlobStore>)> {
    match config {
        StorageConfig::Filesystem {
            root,
            public_base_url,
        } => {
            tokio::fs::create_dir_all(root)
                .await
                .with_context(|| format!("failed to create artifact root {}", root.display()))?;
            info!("Storing artifacts in {}", root.display());
            let store = FsBlobStore::new(root, public_base_url.clone());
            Ok((Arc::new(store.clone()) as Arc<dyn BlobStore>, Some(store)))
        }
        StorageConfig::Http {
            endpoint,
            bucket,
            service_key,
            public_base_url,
        } => {
            let store = HttpBlobStore::new(
                endpoint.clone(),
                bucket.clone(),
                service_key.clone(),
                public_base_url.clone(),
            )?;
            Ok((Arc::new(store) as Arc<dyn BlobStore>, None))
        }
    }
}

/// Run the server until `shutdown` is cancelled.
pub async fn run(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .server
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", config.server.listen))?;

    let db = Database::open(&config.database.path)?;
    info!("Using database {}", config.database.path.display());

    let (blobs, local_artifacts) = storage(&config.storage).await?;
    if config.billing.bypass_quota {
        warn!("Quota checks are disabled (billing.bypass_quota)");
    }

    let launcher = Arc::new(PlaywrightLauncher::new(&config.capture));
    let worker = Arc::new(CaptureWorker::new(
        ObservationStore::new(db.clone()),
        blobs.clone(),
        launcher,
        config.capture.clone(),
        config.retry.clone(),
    ));
    let (queue, supervisors) = CaptureQueue::start(worker, &config.queue, shutdown.clone());

    let reconciler = Reconciler::new(
        ObservationStore::new(db.clone()),
        queue.clone(),
        config.reconciler.clone(),
    );
    let reconciler_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { reconciler.run(shutdown).await }
    });

    let state = Arc::new(AppState::new(
        db,
        blobs,
        local_artifacts,
        queue,
        config.billing.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Viewtrace API listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await?;

    info!("Waiting for in-flight captures to finish");
    for handle in supervisors {
        if let Err(e) = handle.await {
            warn!("Capture supervisor ended abnormally: {}", e);
        }
    }
    if let Err(e) = reconciler_task.await {
        warn!("Reconciler ended abnormally: {}", e);
    }

    info!("Viewtrace API stopped");
    Ok(())
}
