//! Liveness route.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::api::server::AppState;

/// Liveness check response.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub version: &'static str,
}

/// Liveness check - is the service alive?
pub async fn liveness_check(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive",
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
