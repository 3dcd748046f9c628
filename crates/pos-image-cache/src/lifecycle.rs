//! Startup initialization, background sweeping and full reset

use crate::error::Result;
use crate::fetch::Downloader;
use crate::fs::{ensure_dir, remove_dir_if_exists};
use crate::store::ImageCache;
use crate::types::SweepReport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

impl<D: Downloader> ImageCache<D> {
    /// Ensure the cache directory exists and start a sweep in the background.
    ///
    /// Returns as soon as the sweep is spawned; awaiting the handle is optional.
    pub async fn initialize(self: &Arc<Self>) -> JoinHandle<SweepReport> {
        match ensure_dir(self.cache_dir()).await {
            Ok(()) => info!(cache_dir = ?self.cache_dir(), "Cache initialized"),
            Err(e) => warn!(cache_dir = ?self.cache_dir(), error = %e, "Failed to create cache directory"),
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move { cache.sweep().await })
    }

    /// Sweep every `every`, starting one period from now
    pub fn spawn_periodic_sweep(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            // A zero period makes `interval` panic
            let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                debug!("Running periodic cache sweep");
                cache.sweep().await;
            }
        })
    }

    /// Delete every cached image and recreate the empty cache directory
    pub async fn clear_all(&self) -> Result<()> {
        remove_dir_if_exists(self.cache_dir()).await?;
        ensure_dir(self.cache_dir()).await?;
        info!(cache_dir = ?self.cache_dir(), "Cache cleared");
        Ok(())
    }
}
