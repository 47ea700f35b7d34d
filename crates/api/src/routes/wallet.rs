//! Caller-facing wallet routes.
//!
//! Every route here acts on the wallet owned by the token's subject.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use walletpoint_core::ledger::{
    ApplyOutcome, LedgerStore, TransactionCursor, TransferReceipt, TransferRequest, Wallet,
    WalletTransaction,
};
use walletpoint_shared::types::{CursorPage, UserId};

use crate::error::ApiError;
use crate::{AppState, middleware::AuthUser};

/// Page size when the caller does not pass `limit`.
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

/// Creates the wallet routes.
pub fn routes<S: LedgerStore + Clone>() -> Router<AppState<S>> {
    Router::new()
        .route("/wallet", get(get_wallet::<S>))
        .route("/wallet/transactions", get(list_transactions::<S>))
        .route("/wallet/transfers", post(create_transfer::<S>))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for a history page.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Opaque cursor from the previous page's `next_cursor`.
    pub cursor: Option<String>,
    /// Page size (default: 20, capped by the server).
    pub limit: Option<u32>,
}

impl HistoryQuery {
    /// Decodes the cursor, if any.
    pub fn after(&self) -> Result<Option<TransactionCursor>, ApiError> {
        self.cursor
            .as_deref()
            .map(str::parse::<TransactionCursor>)
            .transpose()
            .map_err(ApiError::bad_request)
    }

    /// Requested page size.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)
    }
}

/// Request body for a peer-to-peer transfer.
#[derive(Debug, Deserialize)]
pub struct TransferBody {
    /// Receiving user.
    pub to_user: UserId,
    /// Points to send.
    pub amount: i64,
    /// Caller-chosen reference; resending it returns the original transfer.
    pub reference: String,
    /// Optional note shown on both legs.
    pub note: Option<String>,
}

/// A committed transaction, new or replayed.
///
/// New commits answer `201 Created`, replays `200 OK`.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// The transaction.
    #[serde(flatten)]
    pub transaction: WalletTransaction,
    /// True when an earlier identical request already committed it.
    pub replayed: bool,
}

impl TransactionResponse {
    /// A transaction committed by this request.
    #[must_use]
    pub const fn created(transaction: WalletTransaction) -> Self {
        Self {
            transaction,
            replayed: false,
        }
    }

    /// A transaction committed by an earlier request.
    #[must_use]
    pub const fn replayed(transaction: WalletTransaction) -> Self {
        Self {
            transaction,
            replayed: true,
        }
    }
}

impl From<ApplyOutcome> for TransactionResponse {
    fn from(outcome: ApplyOutcome) -> Self {
        match outcome {
            ApplyOutcome::Applied(tx) => Self::created(tx),
            ApplyOutcome::AlreadyApplied(tx) => Self::replayed(tx),
        }
    }
}

impl IntoResponse for TransactionResponse {
    fn into_response(self) -> Response {
        (replay_status(self.replayed), Json(self)).into_response()
    }
}

/// Both legs of a transfer.
#[derive(Debug, Serialize)]
pub struct TransferResponse {
    /// Debit on the sender.
    pub debit: WalletTransaction,
    /// Credit on the receiver.
    pub credit: WalletTransaction,
    /// True when an earlier identical request already committed it.
    pub replayed: bool,
}

impl From<TransferReceipt> for TransferResponse {
    fn from(receipt: TransferReceipt) -> Self {
        Self {
            debit: receipt.debit,
            credit: receipt.credit,
            replayed: receipt.replayed,
        }
    }
}

impl IntoResponse for TransferResponse {
    fn into_response(self) -> Response {
        (replay_status(self.replayed), Json(self)).into_response()
    }
}

const fn replay_status(replayed: bool) -> StatusCode {
    if replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /wallet - the caller's wallet and balance.
async fn get_wallet<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
) -> Result<Json<Wallet>, ApiError> {
    let wallet = state.ledger.wallet_for_user(auth.user_id()).await?;
    Ok(Json(wallet))
}

/// GET /wallet/transactions - the caller's history, oldest first.
async fn list_transactions<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<CursorPage<WalletTransaction>>, ApiError> {
    let after = query.after()?;
    let wallet = state.ledger.wallet_for_user(auth.user_id()).await?;
    let page = state
        .ledger
        .list_transactions(wallet.id, after, query.limit())
        .await?;
    Ok(Json(page))
}

/// POST /wallet/transfers - sends points from the caller to another user.
async fn create_transfer<S: LedgerStore + Clone>(
    State(state): State<AppState<S>>,
    auth: AuthUser,
    Json(body): Json<TransferBody>,
) -> Result<TransferResponse, ApiError> {
    let request = TransferRequest {
        from_user: auth.user_id(),
        to_user: body.to_user,
        amount: body.amount,
        reference: body.reference,
        note: body.note,
    };

    let receipt = state
        .ledger
        .transfer(request, &state.request_token())
        .await?;
    Ok(receipt.into())
}
