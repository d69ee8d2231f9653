//! Server setup and routing.

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::{handlers, state::AppState};

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/generate", post(handlers::generate::handle_generate))
        .route("/v1/requests/{id}", get(handlers::requests::handle_poll))
        .route(
            "/v1/requests/{id}/stream",
            get(handlers::requests::handle_stream),
        )
        .route("/health", get(handlers::health::handle_health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP server until the shutdown token fires.
pub async fn run_server(
    state: AppState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
