//! Artifact storage gateway
//!
//! Screenshots and diff overlays are written once under a caller-chosen key
//! and addressed afterwards by an opaque public reference (a URL that serves
//! the bytes over plain HTTP GET).

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

/// Storage errors
#[derive(Error, Debug)]
pub enum BlobError {
    /// The bucket/container does not exist. Retrying cannot help until an
    /// operator fixes the configuration.
    #[error("Storage container not found: {0}")]
    ContainerNotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Reference is not served by this store: {0}")]
    ForeignReference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage request failed with {status}: {body}")]
    Status { status: u16, body: String },
}

impl BlobError {
    /// Whether this failure is a configuration problem rather than a
    /// transient one.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(self, BlobError::ContainerNotFound(_))
    }
}

pub type BlobResult<T> = std::result::Result<T, BlobError>;

/// Blob storage collaborator
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, returning the public reference.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> BlobResult<String>;

    /// Read back the bytes behind a public reference.
    async fn fetch(&self, public_ref: &str) -> BlobResult<Bytes>;
}

/// Keys are flat file names: no separators, no parent components.
pub fn validate_key(key: &str) -> BlobResult<()> {
    let ok = !key.is_empty()
        && key.len() <= 200
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(BlobError::InvalidKey(key.to_string()))
    }
}

// ============================================================================
// Filesystem backend
// ============================================================================

/// Stores objects as files in a single directory (the "bucket").
///
/// The directory must already exist; it is never created implicitly so a
/// mistyped root surfaces as [`BlobError::ContainerNotFound`].
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_ref(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }

    /// Map a public reference back to its key.
    pub fn key_for(&self, public_ref: &str) -> BlobResult<String> {
        let key = public_ref
            .strip_prefix(&self.public_base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| BlobError::ForeignReference(public_ref.to_string()))?;
        validate_key(key)?;
        Ok(key.to_string())
    }

    /// Read an object by key.
    pub async fn read(&self, key: &str) -> BlobResult<Bytes> {
        validate_key(key)?;
        match fs::read(self.root.join(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_container(&self) -> BlobResult<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(BlobError::ContainerNotFound(self.root.display().to_string()))
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> BlobResult<String> {
        validate_key(key)?;
        self.ensure_container()?;

        let path = self.root.join(key);
        if fs::try_exists(&path).await? {
            return Err(BlobError::AlreadyExists(key.to_string()));
        }

        // Write atomically via temp file
        let tmp_path = self.root.join(format!(".{}.tmp", key));
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!("Stored {} ({} bytes, {})", key, bytes.len(), content_type);
        Ok(self.public_ref(key))
    }

    async fn fetch(&self, public_ref: &str) -> BlobResult<Bytes> {
        let key = self.key_for(public_ref)?;
        self.read(&key).await
    }
}

// ============================================================================
// HTTP object-storage backend
// ============================================================================

/// Object storage reachable over a storage REST API
/// (`POST {endpoint}/object/{bucket}/{key}`).
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    service_key: String,
    public_base_url: String,
}

impl HttpBlobStore {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        service_key: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> BlobResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let store = Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            service_key: service_key.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        };
        info!("Using HTTP object storage at {} (bucket {})", store.endpoint, store.bucket);
        Ok(store)
    }

    pub fn public_ref(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.bucket, key)
    }
}

/// A 404 whose body talks about the bucket means the container is missing,
/// not the object.
fn is_missing_bucket(status: u16, body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    status == 404 && lower.contains("bucket") && lower.contains("not found")
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> BlobResult<String> {
        validate_key(key)?;
        let url = format!("{}/object/{}/{}", self.endpoint, self.bucket, key);
        let size = bytes.len();

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.service_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if resp.status().is_success() {
            debug!("Uploaded {} ({} bytes)", key, size);
            return Ok(self.public_ref(key));
        }

        let body = resp.text().await.unwrap_or_default();
        if is_missing_bucket(status, &body) {
            return Err(BlobError::ContainerNotFound(self.bucket.clone()));
        }
        if status == 409 {
            return Err(BlobError::AlreadyExists(key.to_string()));
        }
        Err(BlobError::Status { status, body })
    }

    async fn fetch(&self, public_ref: &str) -> BlobResult<Bytes> {
        let resp = self.client.get(public_ref).send().await?;
        let status = resp.status().as_u16();
        if status == 404 {
            return Err(BlobError::NotFound(public_ref.to_string()));
        }
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BlobError::Status { status, body });
        }
        Ok(resp.bytes().await?)
    }
}
