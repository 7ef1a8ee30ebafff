//! HTTP server wiring for the StreamFlow API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use streamflow_core::{StreamflowConfig, StreamingService, SwarmEngine};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{api_health, api_metadata, api_stats, stream_file, stream_subtitle};

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<StreamingService>,
}

impl AppState {
    pub fn new(service: Arc<StreamingService>) -> Self {
        Self { service }
    }
}

/// Builds the API router.
///
/// Torrent endpoints live under `/api/torrents`, the prefix the browser
/// player is built against.
pub fn build_router(state: AppState) -> Router {
    let torrents = Router::new()
        .route("/metadata", get(api_metadata))
        .route("/stream/{info_hash}/{file_index}", get(stream_file))
        .route("/subtitles/{info_hash}/{file_index}", get(stream_subtitle))
        .route("/stats/{info_hash}", get(api_stats));

    Router::new()
        .nest("/api/torrents", torrents)
        .route("/health", get(api_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API on the configured address until Ctrl-C.
///
/// Starts the idle transfer sweeper alongside the server.
///
/// # Errors
/// - `std::io::Error` - Failed to bind or serve on the configured address
pub async fn run_server(
    config: StreamflowConfig,
    engine: Arc<dyn SwarmEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::new(config.server.host, config.server.port);
    let service = Arc::new(StreamingService::new(engine, config));
    let sweeper = service.spawn_sweeper();
    let app = build_router(AppState::new(service));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("StreamFlow API running on http://{addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    served?;

    tracing::info!("StreamFlow API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
