//! Resolving remote image URIs to cached local files

use crate::config::CacheConfig;
use crate::error::{ImageCacheError, Result};
use crate::fetch::{Downloader, HttpDownloader};
use crate::fs::{ensure_dir, is_partial, partial_path_for, remove_if_exists};
use crate::key::KeyDeriver;
use crate::sweep::{scan_dir, SweepPolicy, Sweeper};
use crate::types::{CacheStats, Resolved, SweepReport};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

type InFlight = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// A disk-backed image cache keyed by remote URI
pub struct ImageCache<D: Downloader = HttpDownloader> {
    /// Directory where cached images are stored
    cache_dir: PathBuf,
    keys: KeyDeriver,
    downloader: D,
    sweeper: Sweeper,
    fetch_timeout: Duration,
    /// One lock per key with a download in progress
    in_flight: InFlight,
    hits: AtomicU64,
    misses: AtomicU64,
    fetch_failures: AtomicU64,
}

impl ImageCache<HttpDownloader> {
    /// Create a cache that downloads over HTTP
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let downloader = HttpDownloader::with_timeout(config.fetch_timeout)?;
        Ok(Self::with_downloader(config, downloader))
    }
}

impl<D: Downloader> ImageCache<D> {
    /// Create a cache that fetches misses through `downloader`
    pub fn with_downloader(config: &CacheConfig, downloader: D) -> Self {
        Self {
            cache_dir: config.cache_dir.clone(),
            keys: KeyDeriver::new(config.own_api_origin.as_deref()),
            downloader,
            sweeper: Sweeper::new(config.cache_dir.clone(), SweepPolicy::from(config)),
            fetch_timeout: config.fetch_timeout,
            in_flight: StdMutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn downloader(&self) -> &D {
        &self.downloader
    }

    /// Where `uri` is (or would be) stored; does not touch the file system
    pub fn local_path_for(&self, uri: &str) -> PathBuf {
        self.cache_dir.join(self.keys.derive_key(uri))
    }

    /// Like [`ImageCache::resolve`], with a missing URI resolving to `None`
    pub async fn resolve_opt(&self, uri: Option<&str>) -> Option<Resolved> {
        match uri {
            Some(uri) => self.resolve(uri).await,
            None => None,
        }
    }

    /// Resolve `uri` to a local copy, downloading it on a miss.
    ///
    /// Non-http(s) input is handed back as [`Resolved::PassThrough`]. `None`
    /// means the download failed and the caller should fall back.
    pub async fn resolve(&self, uri: &str) -> Option<Resolved> {
        if !is_remote(uri) {
            return Some(Resolved::PassThrough(uri.to_string()));
        }

        if let Err(e) = ensure_dir(&self.cache_dir).await {
            warn!(cache_dir = ?self.cache_dir, error = %e, "Failed to create cache directory");
            return None;
        }

        let key = self.keys.derive_key(uri);
        let path = self.cache_dir.join(&key);

        // Downloads land under a `.part` name, so an existing file is complete
        if file_exists(&path).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache hit");
            return Some(Resolved::Local { path, hit: true });
        }

        let lease = SlotLease::acquire(&self.in_flight, &key);
        let _guard = lease.slot.lock().await;

        // A concurrent resolve may have finished the download while we waited
        if file_exists(&path).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache hit after waiting on in-flight download");
            return Some(Resolved::Local { path, hit: true });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.download(uri, &key, path).await
    }

    async fn download(&self, uri: &str, key: &str, path: PathBuf) -> Option<Resolved> {
        let part = partial_path_for(&path);
        let partial = PartialFile::new(&part);

        let result = match self.fetch_into(uri, &part).await {
            Ok(size) => tokio::fs::rename(&part, &path)
                .await
                .map(|()| size)
                .map_err(ImageCacheError::from),
            Err(e) => Err(e),
        };
        partial.keep();

        match result {
            Ok(size) => {
                debug!(key = %key, size, "Cached image");
                Some(Resolved::Local { path, hit: false })
            }
            Err(e) => {
                self.fetch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(uri, error = %e, "Failed to fetch image");

                if let Err(e) = remove_if_exists(&part).await {
                    warn!(path = ?part, error = %e, "Failed to remove partial download");
                }
                None
            }
        }
    }

    async fn fetch_into(&self, uri: &str, path: &Path) -> Result<u64> {
        match tokio::time::timeout(self.fetch_timeout, self.downloader.download_to(uri, path))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ImageCacheError::Timeout(self.fetch_timeout)),
        }
    }

    /// Drop the cached copy of `uri`, if any
    pub async fn evict_one(&self, uri: &str) {
        if !is_remote(uri) {
            return;
        }

        let path = self.local_path_for(uri);
        match remove_if_exists(&path).await {
            Ok(true) => debug!(uri, path = ?path, "Evicted cache entry"),
            Ok(false) => {}
            Err(e) => warn!(uri, path = ?path, error = %e, "Failed to evict cache entry"),
        }
    }

    /// Enforce the configured age and size bounds now
    pub async fn sweep(&self) -> SweepReport {
        self.sweeper.sweep().await
    }

    pub fn sweep_policy(&self) -> SweepPolicy {
        self.sweeper.policy()
    }

    /// Get current cache statistics
    pub async fn stats(&self) -> CacheStats {
        let (entries, total_size) = match scan_dir(&self.cache_dir).await {
            Ok(entries) => {
                let complete: Vec<_> = entries.iter().filter(|e| !is_partial(&e.path)).collect();
                (complete.len(), complete.iter().map(|e| e.size).sum::<u64>())
            }
            Err(e) => {
                debug!(cache_dir = ?self.cache_dir, error = %e, "Could not list cache directory");
                (0, 0)
            }
        };

        CacheStats {
            entries,
            total_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
        }
    }
}

/// Whether `uri` has an http or https scheme
pub fn is_remote(uri: &str) -> bool {
    has_scheme(uri, "http://") || has_scheme(uri, "https://")
}

fn has_scheme(uri: &str, scheme: &str) -> bool {
    uri.get(..scheme.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// A caller's hold on the per-key download lock.
///
/// Dropping it, on return or on cancellation, removes the key from the
/// in-flight map once nobody else holds it.
struct SlotLease<'a> {
    in_flight: &'a InFlight,
    key: String,
    slot: Arc<Mutex<()>>,
}

impl<'a> SlotLease<'a> {
    fn acquire(in_flight: &'a InFlight, key: &str) -> Self {
        let mut map = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = Arc::clone(
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );

        Self {
            in_flight,
            key: key.to_string(),
            slot,
        }
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this lease hold the slot: nobody is waiting on it
        if Arc::strong_count(&self.slot) <= 2 {
            map.remove(&self.key);
        }
    }
}

/// Removes a download target if the resolving task is dropped mid-fetch
struct PartialFile<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> PartialFile<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::mock::{Behavior, MockDownloader};
    use tempfile::{tempdir, TempDir};

    const URI: &str = "https://api.example.com/img/burger.png";

    fn test_config(dir: &TempDir) -> CacheConfig {
        CacheConfig {
            cache_dir: dir.path().join("images"),
            own_api_origin: Some("https://api.example.com".to_string()),
            fetch_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn test_cache(dir: &TempDir, downloader: MockDownloader) -> ImageCache<MockDownloader> {
        ImageCache::with_downloader(&test_config(dir), downloader)
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("http://a.com/x.png"));
        assert!(is_remote("HTTPS://a.com/x.png"));
        assert!(!is_remote(""));
        assert!(!is_remote("file:///local/a.png"));
        assert!(!is_remote("/data/a.png"));
        assert!(!is_remote("httpx://a.com"));
        assert!(!is_remote("ht"));
    }

    #[tokio::test]
    async fn test_pass_through_does_not_fetch() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir, MockDownloader::succeeding(b"img"));

        assert_eq!(
            cache.resolve("file:///local/a.png").await,
            Some(Resolved::PassThrough("file:///local/a.png".to_string()))
        );
        assert_eq!(
            cache.resolve("").await,
            Some(Resolved::PassThrough(String::new()))
        );
        assert_eq!(cache.resolve_opt(None).await, None);
        assert_eq!(cache.downloader().call_count(), 0);
        assert!(!cache.cache_dir().exists());
    }

    #[tokio::test]
    async fn test_miss_downloads_then_hit_avoids_network() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir, MockDownloader::succeeding(b"image bytes"));

        let path = cache.local_path_for(URI);

        let first = cache.resolve(URI).await.unwrap();
        assert_eq!(
            first,
            Resolved::Local {
                path: path.clone(),
                hit: false
            }
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"image bytes");
        assert!(!partial_path_for(&path).exists());
        assert_eq!(cache.downloader().call_count(), 1);

        let second = cache.resolve(URI).await.unwrap();
        assert_eq!(second, Resolved::Local { path, hit: true });
        assert_eq!(cache.downloader().call_count(), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_size, 11);
    }

    #[tokio::test]
    async fn test_own_origin_query_variants_share_entry() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir, MockDownloader::succeeding(b"img"));

        let a = cache.resolve(&format!("{}?token=a", URI)).await.unwrap();
        let b = cache.resolve(&format!("{}?token=b", URI)).await.unwrap();

        assert_eq!(a.local_path(), b.local_path());
        assert!(b.is_hit());
        assert_eq!(cache.downloader().call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_cleans_up_partial_file() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir, MockDownloader::new(Behavior::FailAfterPartial));

        assert_eq!(cache.resolve(URI).await, None);
        assert!(!cache.local_path_for(URI).exists());
        assert!(!partial_path_for(&cache.local_path_for(URI)).exists());
        assert_eq!(cache.stats().await.fetch_failures, 1);

        // Failures are not cached
        assert_eq!(cache.resolve(URI).await, None);
        assert_eq!(cache.downloader().call_count(), 2);
    }

    #[tokio::test]
    async fn test_hung_fetch_times_out_and_cleans_up() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir, MockDownloader::new(Behavior::Hang));

        assert_eq!(cache.resolve(URI).await, None);
        assert!(!cache.local_path_for(URI).exists());
        assert!(!partial_path_for(&cache.local_path_for(URI)).exists());
    }

    #[tokio::test]
    async fn test_resolve_during_failing_download_is_not_a_hit() {
        let dir = tempdir().unwrap();
        let downloader = MockDownloader::new(Behavior::FailAfterPartial)
            .with_delay(Duration::from_millis(150));
        let cache = Arc::new(test_cache(&dir, downloader));

        let first = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.resolve(URI).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = cache.resolve(URI).await;

        assert_eq!(first.await.unwrap(), None);
        assert_eq!(second, None);
        assert!(!cache.local_path_for(URI).exists());
        assert!(!partial_path_for(&cache.local_path_for(URI)).exists());
        assert_eq!(cache.stats().await.hits, 0);
    }

    #[tokio::test]
    async fn test_leftover_partial_file_is_not_a_hit() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir, MockDownloader::succeeding(b"complete"));
        let path = cache.local_path_for(URI);

        std::fs::create_dir_all(cache.cache_dir()).unwrap();
        std::fs::write(partial_path_for(&path), b"trunc").unwrap();

        let resolved = cache.resolve(URI).await.unwrap();
        assert!(!resolved.is_hit());
        assert_eq!(std::fs::read(&path).unwrap(), b"complete");
        assert_eq!(cache.downloader().call_count(), 1);
        assert_eq!(cache.stats().await.entries, 1);
    }

    #[tokio::test]
    async fn test_cancelled_resolve_releases_slot_and_partial_file() {
        let dir = tempdir().unwrap();
        let config = CacheConfig {
            fetch_timeout: Duration::from_secs(30),
            ..test_config(&dir)
        };
        let cache = ImageCache::with_downloader(&config, MockDownloader::new(Behavior::Hang));

        let cancelled = tokio::time::timeout(Duration::from_millis(50), cache.resolve(URI)).await;

        assert!(cancelled.is_err());
        assert!(cache.in_flight.lock().unwrap().is_empty());
        assert!(!partial_path_for(&cache.local_path_for(URI)).exists());
    }

    #[tokio::test]
    async fn test_concurrent_misses_download_once() {
        let dir = tempdir().unwrap();
        let downloader = MockDownloader::succeeding(b"img").with_delay(Duration::from_millis(50));
        let cache = Arc::new(test_cache(&dir, downloader));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.resolve(URI).await })
            })
            .collect();

        let mut downloaded = 0;
        for handle in handles {
            let resolved = handle.await.unwrap().unwrap();
            assert_eq!(resolved.local_path(), Some(cache.local_path_for(URI).as_path()));
            if !resolved.is_hit() {
                downloaded += 1;
            }
        }

        assert_eq!(downloaded, 1);
        assert_eq!(cache.downloader().call_count(), 1);
        assert!(cache.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evict_one_forces_refetch() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir, MockDownloader::succeeding(b"img"));

        cache.resolve(URI).await.unwrap();
        cache.evict_one(URI).await;
        assert!(!cache.local_path_for(URI).exists());

        // Evicting a missing entry is a no-op
        cache.evict_one(URI).await;
        cache.evict_one("file:///local/a.png").await;

        cache.resolve(URI).await.unwrap();
        assert_eq!(cache.downloader().call_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_dir_recreated_after_external_delete() {
        let dir = tempdir().unwrap();
        let cache = test_cache(&dir, MockDownloader::succeeding(b"img"));

        cache.resolve(URI).await.unwrap();
        std::fs::remove_dir_all(cache.cache_dir()).unwrap();

        let resolved = cache.resolve(URI).await.unwrap();
        assert!(resolved.local_path().unwrap().exists());
        assert_eq!(cache.downloader().call_count(), 2);
    }

    #[tokio::test]
    async fn test_unusable_cache_dir_resolves_to_none() {
        let dir = tempdir().unwrap();
        let config = test_config(&dir);
        std::fs::write(&config.cache_dir, b"not a directory").unwrap();
        let cache = ImageCache::with_downloader(&config, MockDownloader::succeeding(b"img"));

        assert_eq!(cache.resolve(URI).await, None);
        assert_eq!(cache.downloader().call_count(), 0);
    }
}
