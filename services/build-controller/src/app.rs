use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::ConnectInfo,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::debug;

pub fn app(cargo_pkg_name: &'static str, cargo_pkg_version: &'static str) -> Router {
    Router::new()
        .route(
            "/",
            get(move || async move {
                Json(json!({
                    "service": cargo_pkg_name,
                    "version": cargo_pkg_version,
                    "status": "ok"
                }))
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .fallback(not_found_handler)
        .layer(TraceLayer::new_for_http())
}

#[tracing::instrument(name = "health_handler", skip_all)]
async fn health_handler(ConnectInfo(addr): ConnectInfo<SocketAddr>) -> impl IntoResponse {
    debug!(%addr, "health probe");
    Json(json!({ "status": "healthy" }))
}

#[tracing::instrument(name = "ready_handler", skip_all)]
async fn ready_handler(ConnectInfo(addr): ConnectInfo<SocketAddr>) -> impl IntoResponse {
    debug!(%addr, "readiness probe");
    Json(json!({ "status": "ready" }))
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "nothing to see here")
}
