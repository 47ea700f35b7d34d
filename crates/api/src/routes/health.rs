//! Health check endpoints.

use axum::{Json, Router, routing::get};
use serde::Serialize;
use walletpoint_core::ledger::LedgerStore;

use crate::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Service version.
    pub version: &'static str,
}

/// Health check handler.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "walletpoint-ledger",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Creates health check routes.
pub fn routes<S: LedgerStore + Clone>() -> Router<AppState<S>> {
    Router::new().route("/health", get(health_check))
}
