use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use viewtrace_web::config::{Config, StorageConfig};

#[derive(Parser)]
#[command(name = "viewtraced")]
#[command(author, version, about = "Viewtrace observation capture and comparison server")]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "VIEWTRACE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides server.listen)
    #[arg(long, env = "VIEWTRACE_LISTEN")]
    listen: Option<String>,

    /// Database path (overrides database.path)
    #[arg(long, env = "VIEWTRACE_DB")]
    db: Option<PathBuf>,

    /// Artifact directory for the filesystem storage backend
    #[arg(long, env = "VIEWTRACE_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = args
        .config
        .unwrap_or_else(|| viewtrace_common::default_data_dir().join("viewtrace.toml"));
    let mut config = Config::load(&config_path)?;

    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(db) = args.db {
        config.database.path = db;
    }
    if let Some(storage_root) = args.storage_root {
        match &mut config.storage {
            StorageConfig::Filesystem { root, .. } => *root = storage_root,
            StorageConfig::Http { .. } => {
                warn!("--storage-root ignored: storage backend is http")
            }
        }
    }

    info!(
        "Starting Viewtrace {} (config: {})",
        viewtrace_common::VERSION,
        config_path.display()
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
                return;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    viewtrace_web::server::run(config, shutdown).await
}
