//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A file in the cache directory, as seen by a directory scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub size: u64,
    /// Last-modified time, used as the recency signal for eviction
    pub modified: DateTime<Utc>,
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub fetch_failures: u64,
}

/// Outcome of one sweep over the cache directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Entries that could be listed and stat'ed
    pub scanned: usize,
    /// Removed by the age pass
    pub expired: usize,
    /// Removed by the size pass
    pub evicted: usize,
    /// Stale partial downloads removed
    pub partials_removed: usize,
    pub failed_deletions: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// The directory could not be listed, nothing was touched
    pub aborted: bool,
}

/// Result of resolving an image URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Not an http(s) URI; handed back unchanged
    PassThrough(String),
    /// Path of the cached copy; `hit` is false when this call downloaded it
    Local { path: PathBuf, hit: bool },
}

impl Resolved {
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Resolved::Local { path, .. } => Some(path),
            Resolved::PassThrough(_) => None,
        }
    }

    /// Whether the copy was already cached before this resolve
    pub fn is_hit(&self) -> bool {
        matches!(self, Resolved::Local { hit: true, .. })
    }

    /// URI a renderer can load: `file://` for cached copies, the input otherwise
    pub fn to_uri(&self) -> String {
        match self {
            Resolved::Local { path, .. } => format!("file://{}", path.display()),
            Resolved::PassThrough(uri) => uri.clone(),
        }
    }
}
