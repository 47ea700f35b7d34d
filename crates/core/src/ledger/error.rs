//! Ledger error types.
//!
//! Domain errors (`WalletNotFound`, `InsufficientBalance`, ...) pass straight
//! through to the caller. `Store` is the only transient kind and the only one
//! the service retries.

use thiserror::Error;
use walletpoint_shared::AppError;
use walletpoint_shared::types::{TransactionId, UserId, WalletId};

use super::types::{TransactionKind, WalletTransaction};

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Lookup Errors ==========
    /// Wallet not found.
    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    /// The user has no wallet.
    #[error("No wallet for user {0}")]
    WalletNotFoundForUser(UserId),

    /// The user already owns a wallet.
    #[error("User {0} already has a wallet")]
    WalletAlreadyExists(UserId),

    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    // ========== Business Rule Errors ==========
    /// The change would drive the balance below zero.
    #[error("Insufficient balance in wallet {wallet_id}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        /// The wallet.
        wallet_id: WalletId,
        /// Balance at the time of the attempt.
        balance: i64,
        /// Points the change tried to remove.
        requested: i64,
    },

    /// The original transaction was already refunded.
    #[error("Transaction {original} was already refunded by {}", .refund.id)]
    AlreadyRefunded {
        /// The transaction that was refunded.
        original: TransactionId,
        /// The existing refund.
        refund: Box<WalletTransaction>,
    },

    /// Only purchases and rewards can be refunded.
    #[error("Transaction {transaction_id} of kind {kind} cannot be refunded")]
    NotRefundable {
        /// The transaction.
        transaction_id: TransactionId,
        /// Its kind.
        kind: TransactionKind,
    },

    // ========== Validation Errors ==========
    /// A change of zero points.
    #[error("Balance change cannot be zero")]
    ZeroDelta,

    /// Amount must be positive.
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(i64),

    /// Sender and receiver are the same wallet.
    #[error("Cannot transfer to the same wallet")]
    SelfTransfer,

    /// The resulting balance does not fit in an i64.
    #[error("Balance overflow")]
    BalanceOverflow,

    /// Malformed input that is not an amount problem.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ========== Concurrency Errors ==========
    /// The `(wallet, kind, reference)` key is already taken.
    ///
    /// Raised by stores; the applier turns it into an idempotent replay.
    #[error("Duplicate idempotency key")]
    DuplicateKey,

    /// The caller gave up before the wallet lock was acquired.
    #[error("Operation cancelled before acquiring the wallet")]
    Cancelled,

    // ========== Store Errors ==========
    /// Transient persistence failure; nothing was committed.
    #[error("Store error: {0}")]
    Store(String),

    /// History and cached balance disagree, or history is malformed.
    #[error("Ledger integrity violation: {0}")]
    Integrity(String),
}

impl LedgerError {
    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::WalletNotFound(_) => "WALLET_NOT_FOUND",
            Self::WalletNotFoundForUser(_) => "WALLET_NOT_FOUND_FOR_USER",
            Self::WalletAlreadyExists(_) => "WALLET_ALREADY_EXISTS",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::AlreadyRefunded { .. } => "ALREADY_REFUNDED",
            Self::NotRefundable { .. } => "NOT_REFUNDABLE",
            Self::ZeroDelta => "ZERO_DELTA",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::SelfTransfer => "SELF_TRANSFER",
            Self::BalanceOverflow => "BALANCE_OVERFLOW",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::DuplicateKey => "DUPLICATE_KEY",
            Self::Cancelled => "CANCELLED",
            Self::Store(_) => "STORE_ERROR",
            Self::Integrity(_) => "INTEGRITY_VIOLATION",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::WalletNotFound(_)
            | Self::WalletNotFoundForUser(_)
            | Self::TransactionNotFound(_) => 404,
            Self::WalletAlreadyExists(_) | Self::DuplicateKey => 409,
            Self::InsufficientBalance { .. }
            | Self::NotRefundable { .. }
            | Self::BalanceOverflow => 422,
            Self::ZeroDelta
            | Self::InvalidAmount(_)
            | Self::SelfTransfer
            | Self::InvalidRequest(_) => 400,
            // A refund replay is a success at the HTTP layer; this is the
            // fallback for callers that do not special-case it.
            Self::AlreadyRefunded { .. } => 200,
            Self::Cancelled | Self::Store(_) => 503,
            Self::Integrity(_) => 500,
        }
    }

    /// True for failures worth retrying with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::WalletNotFound(_)
            | LedgerError::WalletNotFoundForUser(_)
            | LedgerError::TransactionNotFound(_) => Self::NotFound(message),
            LedgerError::WalletAlreadyExists(_)
            | LedgerError::DuplicateKey
            | LedgerError::AlreadyRefunded { .. } => Self::Conflict(message),
            LedgerError::InsufficientBalance { .. }
            | LedgerError::NotRefundable { .. }
            | LedgerError::BalanceOverflow => Self::BusinessRule(message),
            LedgerError::ZeroDelta
            | LedgerError::InvalidAmount(_)
            | LedgerError::SelfTransfer
            | LedgerError::InvalidRequest(_) => Self::Validation(message),
            LedgerError::Cancelled | LedgerError::Store(_) => Self::Unavailable(message),
            LedgerError::Integrity(_) => Self::Internal(message),
        }
    }
}
