//! Disk-backed image cache for the point-of-sale client
//!
//! Resolves remote image URIs to local files, downloading on a miss, and keeps
//! the cache directory within an age and total-size bound. The directory
//! listing is the only index: every entry is a flat `<sha256>.<ext>` file.

pub mod config;
pub mod error;
pub mod fetch;
mod fs;
pub mod key;
mod lifecycle;
pub mod store;
pub mod sweep;
pub mod types;

pub use config::CacheConfig;
pub use error::{ImageCacheError, Result};
pub use fetch::{Downloader, HttpDownloader};
pub use key::KeyDeriver;
pub use store::ImageCache;
pub use sweep::{SweepPolicy, Sweeper};
pub use types::{CacheEntry, CacheStats, Resolved, SweepReport};
