//! Downloading remote images into the cache directory

use crate::error::{ImageCacheError, Result};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const DEFAULT_USER_AGENT: &str = "pos-image-cache/0.1";

/// Fetches a remote resource and streams it to a local file
pub trait Downloader: Send + Sync + 'static {
    /// Write the body of `uri` to `dest`, returning the number of bytes written.
    ///
    /// On error `dest` may hold a partial file; the caller removes it.
    fn download_to(&self, uri: &str, dest: &Path) -> impl Future<Output = Result<u64>> + Send;
}

/// HTTP client for fetching images
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    /// Create a new downloader with default settings
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a new downloader with a custom request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    /// Wrap an already configured client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Downloader for HttpDownloader {
    async fn download_to(&self, uri: &str, dest: &Path) -> Result<u64> {
        debug!(uri, dest = ?dest, "Downloading image");

        let mut response = self.client.get(uri).send().await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), uri, "Failed to fetch image");
            return Err(ImageCacheError::Status(response.status().as_u16()));
        }

        let mut file = File::create(dest).await?;
        let mut written = 0u64;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        debug!(uri, size = written, "Downloaded image");
        Ok(written)
    }
}
