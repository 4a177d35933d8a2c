pub mod routes;
pub mod ws;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::AppState;

const ENABLE_LOGS: bool = true;

use crate::log_info;

pub fn router(state: AppState) -> Router {
    // The dashboard is served from its own dev server, so any origin may connect.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::status))
        .route("/api/health", get(routes::health))
        .route("/api/readings", get(routes::recent_readings))
        .route("/ws/frontend", get(ws::frontend_socket))
        .layer(cors)
        .with_state(state)
}

/// Serves HTTP and viewer sessions until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    let local_addr = listener
        .local_addr()
        .context("failed to read listener address")?;
    log_info!("listening on http://{local_addr} (viewers at /ws/frontend)");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server failed")
}
