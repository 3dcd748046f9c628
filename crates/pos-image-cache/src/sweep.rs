//! Age and size bounded eviction over the cache directory
//!
//! A sweep lists the directory, drops entries older than the age bound, then
//! removes the least recently modified entries until the total size is back
//! under the size bound. Failures on individual entries are logged and
//! skipped; a directory that cannot be listed aborts the sweep untouched.

use crate::config::CacheConfig;
use crate::fs::{ensure_dir, is_partial, remove_if_exists};
use crate::types::{CacheEntry, SweepReport};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

/// Bounds enforced by a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    pub max_age: Duration,
    /// Maximum total size in bytes
    pub max_total_size: u64,
    /// Partial downloads older than this are left over from a crash
    pub partial_max_age: Duration,
}

impl From<&CacheConfig> for SweepPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_age: config.max_age(),
            max_total_size: config.max_total_size_bytes(),
            partial_max_age: config.fetch_timeout.saturating_mul(2),
        }
    }
}

pub struct Sweeper {
    cache_dir: PathBuf,
    policy: SweepPolicy,
}

impl Sweeper {
    pub fn new(cache_dir: impl Into<PathBuf>, policy: SweepPolicy) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            policy,
        }
    }

    pub fn policy(&self) -> SweepPolicy {
        self.policy
    }

    /// Run a sweep against the current time
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now()).await
    }

    /// Run a sweep treating `now` as the current time
    pub async fn sweep_at(&self, now: SystemTime) -> SweepReport {
        self.run(now, |path| async move { remove_if_exists(&path).await })
            .await
    }

    /// Sweep with `remove` deleting each selected file
    async fn run<F, Fut>(&self, now: SystemTime, remove: F) -> SweepReport
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = io::Result<bool>>,
    {
        let mut report = SweepReport::default();

        if let Err(e) = ensure_dir(&self.cache_dir).await {
            warn!(cache_dir = ?self.cache_dir, error = %e, "Failed to create cache directory");
        }

        let scanned = match scan_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(cache_dir = ?self.cache_dir, error = %e, "Failed to list cache directory, skipping sweep");
                report.aborted = true;
                return report;
            }
        };

        let now = DateTime::<Utc>::from(now);
        let (partials, entries): (Vec<_>, Vec<_>) =
            scanned.into_iter().partition(|e| is_partial(&e.path));

        for partial in partials {
            if !is_expired(&partial, now, self.policy.partial_max_age) {
                continue;
            }
            match remove(partial.path.clone()).await {
                Ok(_) => {
                    debug!(path = ?partial.path, "Removed stale partial download");
                    report.partials_removed += 1;
                }
                Err(e) => {
                    warn!(path = ?partial.path, error = %e, "Failed to remove stale partial download");
                    report.failed_deletions += 1;
                }
            }
        }

        report.scanned = entries.len();
        report.bytes_before = entries.iter().map(|e| e.size).sum();

        // Entries whose deletion failed still occupy disk but are not retried
        let mut stuck_bytes: u64 = 0;
        let mut survivors = Vec::with_capacity(entries.len());

        for entry in entries {
            if is_expired(&entry, now, self.policy.max_age) {
                match remove(entry.path.clone()).await {
                    Ok(_) => {
                        debug!(path = ?entry.path, "Removed expired cache entry");
                        report.expired += 1;
                    }
                    Err(e) => {
                        warn!(path = ?entry.path, error = %e, "Failed to remove expired cache entry");
                        report.failed_deletions += 1;
                        stuck_bytes += entry.size;
                    }
                }
                continue;
            }
            survivors.push(entry);
        }

        let mut total: u64 = stuck_bytes + survivors.iter().map(|e| e.size).sum::<u64>();

        if total > self.policy.max_total_size {
            survivors.sort_by(|a, b| {
                a.modified
                    .cmp(&b.modified)
                    .then_with(|| a.path.cmp(&b.path))
            });

            for entry in &survivors {
                if total <= self.policy.max_total_size {
                    break;
                }

                match remove(entry.path.clone()).await {
                    Ok(_) => {
                        debug!(path = ?entry.path, size = entry.size, "Evicted oldest cache entry");
                        total = total.saturating_sub(entry.size);
                        report.evicted += 1;
                    }
                    Err(e) => {
                        warn!(path = ?entry.path, error = %e, "Failed to evict cache entry");
                        report.failed_deletions += 1;
                    }
                }
            }
        }

        report.bytes_after = total;

        info!(
            scanned = report.scanned,
            expired = report.expired,
            evicted = report.evicted,
            partials_removed = report.partials_removed,
            failed_deletions = report.failed_deletions,
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            "Cache sweep finished"
        );

        report
    }
}

fn is_expired(entry: &CacheEntry, now: DateTime<Utc>, max_age: Duration) -> bool {
    // A modification time in the future has age zero
    now.signed_duration_since(entry.modified)
        .to_std()
        .map(|age| age > max_age)
        .unwrap_or(false)
}

/// List regular files in `dir` with their size and modification time.
///
/// Entries that cannot be stat'ed are skipped; failing to list `dir` is an error.
pub(crate) async fn scan_dir(dir: &Path) -> io::Result<Vec<CacheEntry>> {
    let mut read_dir = fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(dir_entry) = read_dir.next_entry().await? {
        let path = dir_entry.path();

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = ?path, error = %e, "Skipping cache entry that could not be stat'ed");
                continue;
            }
        };

        if !metadata.is_file() {
            continue;
        }

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(e) => {
                debug!(path = ?path, error = %e, "Skipping cache entry without modification time");
                continue;
            }
        };

        entries.push(CacheEntry {
            path,
            size: metadata.len(),
            modified: DateTime::<Utc>::from(modified),
        });
    }

    Ok(entries)
}
