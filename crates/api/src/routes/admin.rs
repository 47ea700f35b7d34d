//! Admin wallet management and ledger oversight routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use walletpoint_core::ledger::{
    LedgerError, LedgerStats, LedgerStore, Reconciliation, TransactionKind, Wallet, WalletTransaction,
};
use walletpoint_shared::Role;
use walletpoint_shared::types::{CursorPage, PageRequest, PageResponse, TransactionId, WalletId};

use super::wallet::{HistoryQuery, TransactionResponse};
use crate::error::ApiError;
use crate::{AppState, middleware::AuthUser};

/// Creates the admin routes.
pub fn routes<S: LedgerStore + Clone>() -> Router<AppState<S>> {
    Router::new()
        .route("/admin/wallets", get(list_wallets::<S>))
        .route("/admin/wallets/{wallet_id}/transactions", get(list_transactions::<S>))
        .route("/admin/wallets/{wallet_id}/reconcile", get(reconcile_wallet::<S>))
        .route("/admin/wallets/{wallet_id}/adjust", post(adjust_wallet::<S>))
        .route("/admin/wallets/{wallet_id}/reset", post(reset_wallet::<S>))
        .route("/admin/transactions", get(list_all_transactions::<S>))
        .route("/admin/transactions/{transaction_id}/refund", post(refund_transaction::<S>))
        .route("/admin/stats", get(ledger_stats::<S>))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for the ledger-wide feed.
#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    /// Only transactions of this kind, e.g. `TRANSFER_OUT` for the transfer log.
    pub kind: Option<String>,
    /// Opaque cursor from the previous page's `next_cursor`.
    pub cursor: Option<String>,
    /// Page size (default: 20, capped by the server).
    pub limit: Option<u32>,
}

impl FeedQuery {
    /// Decodes the kind filter, if any.
    pub fn kind(&self) -> Result<Option<TransactionKind>, ApiError> {
        self.kind
            .as_deref()
            .map(str::parse::<TransactionKind>)
            .transpose()
            .map_err(ApiError::bad_request)
    }

    fn page(&self) -> HistoryQuery {
        HistoryQuery {
            cursor: self.cursor.clone(),
            limit: self.limit,
        }
    }
}

/// Request body for a manual adjustment.
#[derive(Debug, Deserialize)]
pub struct AdjustBody {
    /// Signed change; negative removes points.
    pub delta: i64,
    /// Why the adjustment was made.
    pub note: String,
}

/// Request body for a balance reset.
#[derive(Debug, Deserialize)]
pub struct ResetBody {
    /// Balance the wallet should end up with.
    pub balance: i64,
    /// Why the reset was made.
    pub reason: String,
}

/// Request body for a refund.
#[derive(Debug, Default, Deserialize)]
pub struct RefundBody {
    /// Shown in the wallet history instead of the default description.
    pub reason: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /admin/wallets?page&per_page
async fn list_wallets<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
    Query(page): Query<PageRequest>,
) -> Result<Json<PageResponse<Wallet>>, ApiError> {
    auth.require_any(&[Role::Admin])?;
    Ok(Json(state.ledger.list_wallets(&page).await?))
}

/// GET /admin/wallets/{wallet_id}/transactions?cursor&limit
async fn list_transactions<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
    Path(wallet_id): Path<WalletId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<CursorPage<WalletTransaction>>, ApiError> {
    auth.require_any(&[Role::Admin])?;
    let page = state
        .ledger
        .list_transactions(wallet_id, query.after()?, query.limit())
        .await?;
    Ok(Json(page))
}

/// GET /admin/transactions?kind&cursor&limit - every wallet's history, oldest first.
async fn list_all_transactions<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
    Query(query): Query<FeedQuery>,
) -> Result<Json<CursorPage<WalletTransaction>>, ApiError> {
    auth.require_any(&[Role::Admin])?;
    let kind = query.kind()?;
    let page = query.page();
    let feed = state
        .ledger
        .list_all_transactions(kind, page.after()?, page.limit())
        .await?;
    Ok(Json(feed))
}

/// GET /admin/stats - points in circulation and today's activity.
async fn ledger_stats<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
) -> Result<Json<LedgerStats>, ApiError> {
    auth.require_any(&[Role::Admin])?;
    Ok(Json(state.ledger.ledger_stats().await?))
}

/// GET /admin/wallets/{wallet_id}/reconcile
async fn reconcile_wallet<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
    Path(wallet_id): Path<WalletId>,
) -> Result<Json<Reconciliation>, ApiError> {
    auth.require_any(&[Role::Admin])?;
    let report = state
        .ledger
        .reconcile(wallet_id, &state.request_token())
        .await?;
    Ok(Json(report))
}

/// POST /admin/wallets/{wallet_id}/adjust
async fn adjust_wallet<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
    Path(wallet_id): Path<WalletId>,
    Json(body): Json<AdjustBody>,
) -> Result<TransactionResponse, ApiError> {
    auth.require_any(&[Role::Admin])?;
    let tx = state
        .ledger
        .admin_adjust(
            wallet_id,
            body.delta,
            auth.user_id(),
            &body.note,
            &state.request_token(),
        )
        .await?;
    Ok(TransactionResponse::created(tx))
}

/// POST /admin/wallets/{wallet_id}/reset
async fn reset_wallet<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
    Path(wallet_id): Path<WalletId>,
    Json(body): Json<ResetBody>,
) -> Result<TransactionResponse, ApiError> {
    auth.require_any(&[Role::Admin])?;
    let tx = state
        .ledger
        .reset_balance(
            wallet_id,
            body.balance,
            auth.user_id(),
            &body.reason,
            &state.request_token(),
        )
        .await?;
    Ok(TransactionResponse::created(tx))
}

/// POST /admin/transactions/{transaction_id}/refund
///
/// A second refund of the same transaction answers `200` with the existing
/// refund and `"replayed": true`.
async fn refund_transaction<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
    Path(transaction_id): Path<TransactionId>,
    Json(body): Json<RefundBody>,
) -> Result<TransactionResponse, ApiError> {
    auth.require_any(&[Role::Admin])?;
    let original = state.ledger.transaction(transaction_id).await?;

    let result = state
        .ledger
        .refund(
            original.wallet_id,
            original.id,
            Some(auth.user_id()),
            body.reason.as_deref(),
            &state.request_token(),
        )
        .await;

    match result {
        Ok(refund) => Ok(TransactionResponse::created(refund)),
        Err(LedgerError::AlreadyRefunded { refund, .. }) => Ok(TransactionResponse::replayed(*refund)),
        Err(err) => Err(err.into()),
    }
}
