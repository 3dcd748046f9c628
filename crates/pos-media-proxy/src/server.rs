//! HTTP server for media proxy endpoints
//!
//! Provides /health, /image, /admin/sweep and /admin/clear endpoints.

use crate::types::{ErrorResponse, HealthResponse, ImageQuery};
use axum::{
    extract::{Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use pos_image_cache::{ImageCache, Resolved, SweepReport};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: Arc<ImageCache>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: Arc<ImageCache>) -> Self {
        Self {
            cache,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/image", get(get_image).delete(delete_image))
        .route("/admin/sweep", post(sweep))
        .route("/admin/clear", post(clear))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache_stats = state.cache.stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: cache_stats,
    })
}

/// Serve the cached copy of a remote image, downloading it on a miss
async fn get_image(State(state): State<SharedState>, Query(query): Query<ImageQuery>) -> Response {
    let (path, hit) = match state.cache.resolve(&query.uri).await {
        Some(Resolved::Local { path, hit }) => (path, hit),
        Some(Resolved::PassThrough(_)) => {
            return error_response(StatusCode::BAD_REQUEST, "Only http(s) URIs can be cached");
        }
        None => {
            warn!(uri = %query.uri, "Failed to resolve image");
            return error_response(StatusCode::BAD_GATEWAY, "Image could not be fetched");
        }
    };

    // A sweep may remove the file between resolve and read
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) => {
            error!(path = ?path, error = %e, "Failed to read cached image");
            return error_response(StatusCode::BAD_GATEWAY, "Image could not be read");
        }
    };

    let cache_header = if hit { "HIT" } else { "MISS" };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&path)),
            (header::CACHE_CONTROL, "public, max-age=86400"),
            (X_CACHE, cache_header),
        ],
        data,
    )
        .into_response()
}

/// Invalidate the cached copy of a remote image
async fn delete_image(
    State(state): State<SharedState>,
    Query(query): Query<ImageQuery>,
) -> StatusCode {
    state.cache.evict_one(&query.uri).await;
    StatusCode::NO_CONTENT
}

/// Run a sweep now and report what it removed
async fn sweep(State(state): State<SharedState>) -> Json<SweepReport> {
    Json(state.cache.sweep().await)
}

/// Drop every cached image
async fn clear(State(state): State<SharedState>) -> Response {
    match state.cache.clear_all().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(error = %e, "Failed to clear cache");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Cache could not be cleared")
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("avif") => "image/avif",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
