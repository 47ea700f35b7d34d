//! HTTP API layer with Axum routes and middleware.
//!
//! This crate provides:
//! - REST routes over the ledger service
//! - Bearer token authentication and role guards
//! - Ledger error to HTTP response mapping

pub mod error;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use walletpoint_core::ledger::{LedgerService, LedgerStore};
use walletpoint_shared::JwtService;

/// Application state shared across handlers.
pub struct AppState<S> {
    /// Ledger use cases.
    pub ledger: Arc<LedgerService<S>>,
    /// JWT service for token verification.
    pub jwt_service: Arc<JwtService>,
    /// Cancelled on shutdown; handlers derive their per-request tokens from it.
    pub shutdown: CancellationToken,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            jwt_service: Arc::clone(&self.jwt_service),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S> AppState<S> {
    /// Token for one request; fires when the server shuts down.
    #[must_use]
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

/// Creates the main application router.
pub fn create_router<S>(state: AppState<S>) -> Router
where
    S: LedgerStore + Clone,
{
    Router::new()
        .nest("/api/v1", routes::api_routes_with_state(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
