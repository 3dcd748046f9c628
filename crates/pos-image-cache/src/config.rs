//! Cache configuration parsed from environment variables

use std::env;
use std::path::PathBuf;
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Configuration for the image cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    pub max_age_days: u64,
    pub max_total_size_mb: u64,
    /// Base URL of the backend; its images are keyed by path only
    pub own_api_origin: Option<String>,
    pub fetch_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/images"),
            max_age_days: 7,
            max_total_size_mb: 100,
            own_api_origin: None,
            fetch_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl CacheConfig {
    /// Parse configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache_dir = env::var("IMAGE_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let max_age_days = parse_var("IMAGE_CACHE_MAX_AGE_DAYS").unwrap_or(defaults.max_age_days);

        let max_total_size_mb =
            parse_var("IMAGE_CACHE_MAX_SIZE_MB").unwrap_or(defaults.max_total_size_mb);

        let own_api_origin = env::var("API_ORIGIN")
            .ok()
            .filter(|origin| !origin.trim().is_empty());

        let fetch_timeout = parse_var("IMAGE_FETCH_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.fetch_timeout);

        let sweep_interval = parse_var("IMAGE_CACHE_SWEEP_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        Self {
            cache_dir,
            max_age_days,
            max_total_size_mb,
            own_api_origin,
            fetch_timeout,
            sweep_interval,
        }
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days.saturating_mul(SECS_PER_DAY))
    }

    pub fn max_total_size_bytes(&self) -> u64 {
        self.max_total_size_mb.saturating_mul(BYTES_PER_MB)
    }
}

fn parse_var(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|s| s.trim().parse::<u64>().ok())
}
