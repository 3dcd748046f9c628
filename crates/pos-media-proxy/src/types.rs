//! Core types for the POS media proxy

use pos_image_cache::{CacheConfig, CacheStats};
use serde::{Deserialize, Serialize};

/// Configuration for the media proxy
#[derive(Debug, Clone)]
pub struct MediaProxyConfig {
    pub port: u16,
    pub cache: CacheConfig,
}

impl Default for MediaProxyConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            cache: CacheConfig::default(),
        }
    }
}

impl MediaProxyConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(3001);

        Self {
            port,
            cache: CacheConfig::from_env(),
        }
    }
}

/// Query string carrying the remote image URI
#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub uri: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
