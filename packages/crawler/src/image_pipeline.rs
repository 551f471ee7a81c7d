//! Image pipeline (C5): fetch, validate, content-address, store, return a
//! canonical URL. A failed image never fails the owning product; callers
//! collect [`ImageOutcome`] per URL and keep the successful subset.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use url::Url;

use crate::error::CrawlerError;

pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_BATCH_CONCURRENCY: usize = 4;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persist `bytes` under `key` (the content hash plus extension) and
    /// return the canonical public URL clients will be given.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, CrawlerError>;
}

/// Stores images as flat files under a root directory, named by their
/// content hash. The canonical URL is `{public_base_url}/{key}`.
pub struct LocalImageStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, CrawlerError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CrawlerError::Fatal(format!("failed to create image store root: {e}")))?;

        let path = self.root.join(key);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CrawlerError::Fatal(format!("failed to write image {}: {e}", path.display())))?;

        Ok(format!("{}/{}", self.public_base_url.trim_end_matches('/'), key))
    }
}

#[derive(Debug, Clone)]
pub struct ImageOutcome {
    pub source_url: String,
    pub result: Result<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ImageBatchStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct ImagePipeline<S: ImageStore> {
    http: reqwest::Client,
    store: Arc<S>,
    max_bytes: u64,
    batch_concurrency: usize,
}

impl<S: ImageStore> ImagePipeline<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_limits(
            store,
            DEFAULT_MAX_BYTES,
            std::time::Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        )
    }

    /// Build with explicit size and timeout limits instead of the module
    /// defaults, typically sourced from configuration.
    pub fn with_limits(store: Arc<S>, max_bytes: u64, fetch_timeout: std::time::Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(fetch_timeout)
                .build()
                .expect("reqwest client config is static and known-valid"),
            store,
            max_bytes,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    fn resolve(base: &str, candidate: &str) -> Result<Url, CrawlerError> {
        if let Ok(url) = Url::parse(candidate) {
            return Ok(url);
        }
        let base_url = Url::parse(base)?;
        base_url.join(candidate).map_err(CrawlerError::from)
    }

    fn extension_allowed(url: &Url) -> bool {
        Path::new(url.path())
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    fn sniff_format(bytes: &[u8]) -> Result<&'static str, CrawlerError> {
        let format = image::guess_format(bytes)
            .map_err(|e| CrawlerError::Validation(format!("unrecognized image format: {e}")))?;
        match format {
            image::ImageFormat::Jpeg => Ok("jpg"),
            image::ImageFormat::Png => Ok("png"),
            image::ImageFormat::WebP => Ok("webp"),
            image::ImageFormat::Gif => Ok("gif"),
            other => Err(CrawlerError::Validation(format!("unsupported decoded image format: {other:?}"))),
        }
    }

    /// Fetch, validate, and store a single image, returning its canonical URL.
    pub async fn process_one(&self, base_url: &str, image_url: &str) -> Result<String, CrawlerError> {
        let resolved = Self::resolve(base_url, image_url)?;

        if !Self::extension_allowed(&resolved) {
            return Err(CrawlerError::Validation(format!(
                "image extension not in allowed set: {resolved}"
            )));
        }

        let response = self
            .http
            .get(resolved.clone())
            .send()
            .await
            .map_err(|source| CrawlerError::Fetch { url: resolved.to_string(), source })?;

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(CrawlerError::Validation(format!(
                    "image exceeds max size: {len} > {}",
                    self.max_bytes
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| CrawlerError::Fetch { url: resolved.to_string(), source })?;

        if bytes.len() as u64 > self.max_bytes {
            return Err(CrawlerError::Validation(format!(
                "image exceeds max size: {} > {}",
                bytes.len(),
                self.max_bytes
            )));
        }

        let extension = Self::sniff_format(&bytes)?;
        let hash = hex::encode(Sha256::digest(&bytes));
        let key = format!("{hash}.{extension}");

        self.store.put(&key, &bytes).await
    }

    /// Process a batch of image URLs with bounded concurrency. Each item's
    /// failure is isolated and reported in its own [`ImageOutcome`].
    pub async fn process_batch(&self, base_url: &str, image_urls: &[String]) -> (Vec<ImageOutcome>, ImageBatchStats) {
        let semaphore = Arc::new(Semaphore::new(self.batch_concurrency));
        let mut tasks = Vec::with_capacity(image_urls.len());

        for source_url in image_urls {
            let permit = semaphore.clone();
            let source_url = source_url.clone();
            let base_url = base_url.to_string();
            let pipeline_http = self.http.clone();
            let store = self.store.clone();
            let max_bytes = self.max_bytes;

            tasks.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore is never closed");
                let pipeline = ImagePipeline {
                    http: pipeline_http,
                    store,
                    max_bytes,
                    batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
                };
                let result = pipeline
                    .process_one(&base_url, &source_url)
                    .await
                    .map_err(|e| e.to_string());
                ImageOutcome { source_url, result }
            }));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_err) => outcomes.push(ImageOutcome {
                    source_url: "<unknown>".into(),
                    result: Err(format!("image task panicked: {join_err}")),
                }),
            }
        }

        let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
        let stats = ImageBatchStats {
            attempted: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
        };

        (outcomes, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_allowed_accepts_known_image_extensions() {
        let url = Url::parse("https://example.com/a/b/photo.JPG").unwrap();
        assert!(ImagePipeline::<LocalImageStore>::extension_allowed(&url));
    }

    #[test]
    fn extension_allowed_rejects_non_image_extensions() {
        let url = Url::parse("https://example.com/a/b/doc.pdf").unwrap();
        assert!(!ImagePipeline::<LocalImageStore>::extension_allowed(&url));
    }

    #[test]
    fn resolve_joins_relative_paths_against_base() {
        let resolved = ImagePipeline::<LocalImageStore>::resolve(
            "https://example.com/category/widgets",
            "/images/widget-1.png",
        )
        .unwrap();
        assert_eq!(resolved.as_str(), "https://example.com/images/widget-1.png");
    }

    #[test]
    fn resolve_passes_through_absolute_urls() {
        let resolved = ImagePipeline::<LocalImageStore>::resolve(
            "https://example.com/category/widgets",
            "https://cdn.example.com/widget-1.png",
        )
        .unwrap();
        assert_eq!(resolved.as_str(), "https://cdn.example.com/widget-1.png");
    }
}
