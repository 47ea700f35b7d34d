//! API route definitions.

use axum::{Router, middleware};
use walletpoint_core::ledger::LedgerStore;

use crate::{AppState, middleware::auth::auth_middleware};

pub mod admin;
pub mod health;
pub mod ledger;
pub mod wallet;

/// Creates the API router with protected routes that need state for middleware.
pub fn api_routes_with_state<S>(state: AppState<S>) -> Router<AppState<S>>
where
    S: LedgerStore + Clone,
{
    // Protected routes that require authentication
    let protected_routes = Router::new()
        .merge(wallet::routes())
        .merge(ledger::routes())
        .merge(admin::routes())
        .layer(middleware::from_fn_with_state(state, auth_middleware::<S>));

    Router::new()
        .merge(health::routes())
        .merge(protected_routes)
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
