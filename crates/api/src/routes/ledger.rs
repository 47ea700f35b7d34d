//! Routes for trusted backend collaborators.
//!
//! The marketplace debits purchases, the mission workflow credits rewards and
//! the auth service opens wallets at registration.

use axum::{Json, Router, extract::State, routing::post};
use serde::Deserialize;
use walletpoint_core::ledger::{LedgerStore, Wallet};
use walletpoint_shared::Role;
use walletpoint_shared::types::UserId;

use super::wallet::TransactionResponse;
use crate::error::ApiError;
use crate::{AppState, middleware::AuthUser};

/// Creates the collaborator routes.
pub fn routes<S: LedgerStore + Clone>() -> Router<AppState<S>> {
    Router::new()
        .route("/ledger/wallets", post(open_wallet::<S>))
        .route("/ledger/purchases", post(record_purchase::<S>))
        .route("/ledger/rewards", post(record_reward::<S>))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for opening a wallet.
#[derive(Debug, Deserialize)]
pub struct OpenWalletBody {
    /// The wallet's owner.
    pub user_id: UserId,
}

/// Request body for a marketplace purchase.
#[derive(Debug, Deserialize)]
pub struct PurchaseBody {
    /// Buyer.
    pub user_id: UserId,
    /// Product being bought.
    pub product_id: String,
    /// Marketplace order; with the product it forms the idempotency reference.
    pub order_id: String,
    /// Price in points.
    pub amount: i64,
}

/// Request body for a mission reward.
#[derive(Debug, Deserialize)]
pub struct RewardBody {
    /// Rewarded user.
    pub user_id: UserId,
    /// Approved mission; a mission rewards a wallet at most once.
    pub mission_id: String,
    /// Points granted.
    pub amount: i64,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /ledger/wallets - returns the user's wallet, creating it if needed.
async fn open_wallet<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
    Json(body): Json<OpenWalletBody>,
) -> Result<Json<Wallet>, ApiError> {
    auth.require_any(&[Role::Service, Role::Admin])?;
    let wallet = state.ledger.open_wallet(body.user_id).await?;
    Ok(Json(wallet))
}

/// POST /ledger/purchases
async fn record_purchase<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
    Json(body): Json<PurchaseBody>,
) -> Result<TransactionResponse, ApiError> {
    auth.require_any(&[Role::Service])?;
    let outcome = state
        .ledger
        .purchase(
            body.user_id,
            &body.product_id,
            &body.order_id,
            body.amount,
            &state.request_token(),
        )
        .await?;
    Ok(outcome.into())
}

/// POST /ledger/rewards
async fn record_reward<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
    Json(body): Json<RewardBody>,
) -> Result<TransactionResponse, ApiError> {
    auth.require_any(&[Role::Service])?;
    let outcome = state
        .ledger
        .reward(body.user_id, &body.mission_id, body.amount, &state.request_token())
        .await?;
    Ok(outcome.into())
}
