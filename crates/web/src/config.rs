//! Server configuration
//!
//! Loaded from a TOML file. Every key has a default, and a missing file
//! means all defaults.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use viewtrace_capture::{CaptureConfig, QueueConfig, ReconcilerConfig};
use viewtrace_common::RetryPolicy;

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub capture: CaptureConfig,
    pub queue: QueueConfig,
    pub reconciler: ReconcilerConfig,
    pub retry: RetryPolicy,
    pub storage: StorageConfig,
    pub billing: BillingConfig,
}

impl Config {
    /// Load from `path`. A file that does not exist yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config in {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: viewtrace_common::default_db_path(),
        }
    }
}

/// Where screenshots and diff overlays are stored
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local directory, served by this process under `/artifacts`
    Filesystem {
        #[serde(default = "default_artifact_root")]
        root: PathBuf,
        #[serde(default = "default_public_base_url")]
        public_base_url: String,
    },
    /// Storage-REST-compatible object store
    Http {
        endpoint: String,
        bucket: String,
        service_key: String,
        public_base_url: String,
    },
}

fn default_artifact_root() -> PathBuf {
    viewtrace_common::default_data_dir().join("artifacts")
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080/artifacts".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Filesystem {
            root: default_artifact_root(),
            public_base_url: default_public_base_url(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Skip the subscription and quota check entirely (development only)
    pub bypass_quota: bool,

    /// Shared secret expected in `x-viewtrace-webhook-token`. Webhooks are
    /// rejected while unset.
    pub webhook_token: Option<String>,

    /// New accounts start with an active subscription
    pub auto_activate: bool,
}
