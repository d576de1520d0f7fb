//! Collaborator ports for image download and asset upload.
//!
//! The pipeline never talks to the network or object storage directly; it is
//! handed implementations of [`ImageSource`] and [`AssetStore`] at
//! construction. Local runs and tests inject the in-memory or filesystem
//! adapters instead of flipping environment switches.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use crate::error::{ClassifiedError, Classify, ErrorDetector, ErrorReason};

/// Error type for collaborator operations.
#[derive(Debug, Error)]
pub enum PortError {
    /// The remote answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// Status code returned by the remote.
        status: u16,
        /// Response body or status text.
        message: String,
    },
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The URL scheme is not one this source serves.
    #[error("unsupported image URL: {0}")]
    UnsupportedUrl(String),
}

impl Classify for PortError {
    fn classify(&self, detector: &ErrorDetector) -> ClassifiedError {
        match self {
            PortError::Http { status, message } => detector.classify_status(*status, message),
            PortError::UnsupportedUrl(_) => {
                ClassifiedError::new(ErrorReason::MalformedRequest, self.to_string())
            }
            PortError::Transport(_) => {
                detector.classify_text_or(&self.to_string(), ErrorReason::NetworkError)
            }
            other => detector.classify_error(other),
        }
    }
}

/// Result type for collaborator operations.
pub type PortResult<T> = Result<T, PortError>;

/// Fetches source images.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Downloads the bytes at `url`.
    async fn download(&self, url: &str) -> PortResult<Vec<u8>>;
}

/// Persists generated assets.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Stores `bytes` under `key` and returns the public URL of the object.
    async fn upload(&self, bytes: &[u8], key: &str, content_type: &str) -> PortResult<String>;
}

/// Renders an error with its chain of sources.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

/// Downloads over HTTP(S) with reqwest.
///
/// Other URLs are rejected unless local reads were enabled with
/// [`HttpImageSource::with_local_files`], in which case `file://` URLs and
/// bare paths are read from the filesystem.
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: Client,
    local_files: bool,
}

impl HttpImageSource {
    /// Creates a source with the given per-request timeout.
    pub fn new(timeout: Duration) -> PortResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    /// Creates a source reusing an existing client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            local_files: false,
        }
    }

    /// Also serves `file://` URLs and bare paths from the local filesystem.
    pub fn with_local_files(mut self) -> Self {
        self.local_files = true;
        self
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn download(&self, url: &str) -> PortResult<Vec<u8>> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            if !self.local_files {
                return Err(PortError::UnsupportedUrl(url.to_string()));
            }
            let path = url.strip_prefix("file://").unwrap_or(url);
            tracing::debug!(path, "reading local image");
            return Ok(tokio::fs::read(path).await?);
        }

        tracing::debug!(url, "downloading image");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PortError::Transport(error_chain(&e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PortError::Http {
                status: status.as_u16(),
                message: format!(
                    "Failed to download image: {}",
                    status.canonical_reason().unwrap_or("unknown status")
                ),
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PortError::Transport(error_chain(&e)))?;
        Ok(bytes.to_vec())
    }
}

/// Serves images from an in-memory map keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct StaticImageSource {
    images: Arc<HashMap<String, Vec<u8>>>,
}

impl StaticImageSource {
    /// Creates a source serving the given URL to bytes map.
    pub fn new(images: HashMap<String, Vec<u8>>) -> Self {
        Self {
            images: Arc::new(images),
        }
    }
}

#[async_trait]
impl ImageSource for StaticImageSource {
    async fn download(&self, url: &str) -> PortResult<Vec<u8>> {
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| PortError::NotFound(url.to_string()))
    }
}

/// Writes assets under a local directory and returns `file://` URLs.
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    /// Creates a store rooted at `root`; the directory is created on first upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory assets are written to.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl AssetStore for FsAssetStore {
    async fn upload(&self, bytes: &[u8], key: &str, content_type: &str) -> PortResult<String> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(key);
        tokio::fs::write(&path, bytes).await?;
        let absolute = tokio::fs::canonicalize(&path).await?;
        tracing::debug!(path = %absolute.display(), content_type, "stored asset");
        Ok(format!("file://{}", absolute.display()))
    }
}

/// An uploaded object held by [`InMemoryAssetStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Keeps uploads in memory; URLs use the `memory://` scheme.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAssetStore {
    objects: Arc<Mutex<HashMap<String, StoredAsset>>>,
}

impl InMemoryAssetStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the object stored under `key`.
    pub fn get(&self, key: &str) -> Option<StoredAsset> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing has been uploaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn upload(&self, bytes: &[u8], key: &str, content_type: &str) -> PortResult<String> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_string(),
                StoredAsset {
                    bytes: bytes.to_vec(),
                    content_type: content_type.to_string(),
                },
            );
        Ok(format!("memory://{}", key))
    }
}
