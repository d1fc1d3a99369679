//! HTTP routes.
//!
//! Only `/health` has a route of its own; every other path falls through to
//! the upload handler.

pub mod health;
pub mod ingest;

use axum::Router;
use axum::handler::Handler;
use axum::routing::get;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, HttpMakeClassifier,
    TraceLayer,
};
use tracing::Level;

use crate::api::server::AppState;

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let upload = ingest::ingest_upload.layer(upload_trace_layer());
    Router::new()
        .route("/health", get(health::liveness_check).post(upload.clone()))
        .fallback(upload)
        .with_state(state)
}

/// Request tracing, applied to uploads only so liveness checks stay quiet.
fn upload_trace_layer() -> TraceLayer<HttpMakeClassifier> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(DefaultOnFailure::new().level(Level::ERROR))
}
