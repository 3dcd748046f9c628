//! POS Media Proxy - local image cache front
//!
//! Serves menu, category and product images from the on-disk image cache,
//! downloading them from the backend on first use.

mod error;
mod server;
mod types;

use crate::error::Result;
use crate::server::{start_server, ServerState, SharedState};
use crate::types::MediaProxyConfig;
use pos_image_cache::ImageCache;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("pos_media_proxy=info".parse()?)
        .add_directive("pos_image_cache=info".parse()?);

    // Use JSON format for Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting POS Media Proxy...");

    let config = MediaProxyConfig::from_env();
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache.cache_dir);
    info!("Max cache size: {} MB", config.cache.max_total_size_mb);
    info!("Max entry age: {} days", config.cache.max_age_days);
    if let Some(origin) = &config.cache.own_api_origin {
        info!("Own API origin: {}", origin);
    }

    let cache = Arc::new(ImageCache::from_config(&config.cache)?);

    // Startup sweep runs in the background; the server does not wait for it
    let _startup_sweep = cache.initialize().await;
    let _periodic_sweep = cache.spawn_periodic_sweep(config.cache.sweep_interval);

    let state: SharedState = Arc::new(ServerState::new(cache));

    // Start HTTP server (blocking)
    start_server(state, config.port).await?;

    Ok(())
}
