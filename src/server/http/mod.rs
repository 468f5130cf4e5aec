// src/server/http/mod.rs

//! Router assembly for the two listeners: the content-facing surface and
//! the dashboard surface.

pub mod authn;
pub mod authz;
pub mod document;
pub mod rpc;

use crate::core::metrics::gather_metrics;
use crate::server::context::AppState;
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, get};
use std::sync::Arc;

/// The router bound to `server.port`: content, heartbeat, and the SAML
/// endpoints.
pub fn content_router(state: Arc<AppState>) -> Router {
    let doc_route = format!("{}{{*rest}}", state.settings.doc_id_path);
    Router::new()
        .route("/saml-authn", any(authn::handle_authn))
        .route("/saml-assertion-consumer", any(authn::handle_assertion_consumer))
        .route("/saml-authz", any(authz::handle_batch_authz))
        .route(&doc_route, any(document::handle_document))
        .route("/heartbeat/{*rest}", any(document::handle_heartbeat))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(state)
}

/// The router bound to `server.dashboardPort`: JSON-RPC and metrics.
pub fn dashboard_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/r", get(rpc::handle_rpc_get).post(rpc::handle_rpc))
        .route("/metrics", get(metrics_handler))
        .route("/", get(index_handler))
        .with_state(state)
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

async fn index_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain")],
        format!("feedgate {}\n", env!("CARGO_PKG_VERSION")),
    )
}
