//! Storage boundary for wallets and their transaction history.
//!
//! Reads go through [`LedgerStore`] directly. Every write goes through a
//! [`LedgerUnitOfWork`]: lock the wallets, stage the transactions, then
//! commit all of it or none of it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use walletpoint_shared::types::{PageRequest, TransactionId, UserId, WalletId};

use super::error::LedgerError;
use super::types::{
    IdempotencyKey, NewTransaction, TransactionCursor, TransactionKind, Wallet, WalletTransaction,
};

/// Sum and count of a wallet's deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    /// Sum of every delta.
    pub sum: i64,
    /// Number of transactions.
    pub count: u64,
}

/// Ledger-wide figures for the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Number of wallets.
    pub wallet_count: u64,
    /// Sum of every wallet balance.
    pub circulation_points: i64,
    /// Start of the activity window.
    pub since: DateTime<Utc>,
    /// Transactions created at or after `since`.
    pub today_transactions: u64,
    /// Points credited at or after `since`.
    pub today_credits: i64,
    /// Points debited at or after `since`, as a positive number.
    pub today_debits: i64,
}

/// Read side of the ledger plus the unit-of-work factory.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Write handle produced by [`LedgerStore::begin`].
    type UnitOfWork: LedgerUnitOfWork;

    /// Starts an atomic unit of work.
    async fn begin(&self) -> Result<Self::UnitOfWork, LedgerError>;

    /// Inserts an empty wallet for `owner_id`.
    ///
    /// # Errors
    ///
    /// `WalletAlreadyExists` if the user already owns one.
    async fn create_wallet(&self, owner_id: UserId) -> Result<Wallet, LedgerError>;

    /// Loads a wallet without locking it.
    async fn find_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>, LedgerError>;

    /// Loads the wallet owned by `owner_id`.
    async fn find_wallet_by_owner(&self, owner_id: UserId) -> Result<Option<Wallet>, LedgerError>;

    /// One page of wallets ordered by creation, plus the total count.
    async fn list_wallets(&self, page: &PageRequest) -> Result<(Vec<Wallet>, u64), LedgerError>;

    /// Loads a committed transaction.
    async fn find_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<WalletTransaction>, LedgerError>;

    /// Loads the committed transaction recorded under `key`.
    async fn find_by_key(&self, key: &IdempotencyKey)
    -> Result<Option<WalletTransaction>, LedgerError>;

    /// Up to `limit` transactions ordered by `(created_at, id)` ascending,
    /// strictly after `after` when given.
    async fn list_transactions(
        &self,
        wallet_id: WalletId,
        after: Option<TransactionCursor>,
        limit: u64,
    ) -> Result<Vec<WalletTransaction>, LedgerError>;

    /// Up to `limit` transactions across every wallet, ordered by
    /// `(created_at, id)` ascending, strictly after `after` when given and
    /// restricted to `kind` when given.
    async fn list_all_transactions(
        &self,
        kind: Option<TransactionKind>,
        after: Option<TransactionCursor>,
        limit: u64,
    ) -> Result<Vec<WalletTransaction>, LedgerError>;

    /// Recomputes the wallet's totals from its history.
    async fn ledger_totals(&self, wallet_id: WalletId) -> Result<LedgerTotals, LedgerError>;

    /// Balances in circulation plus the activity recorded since `since`.
    async fn ledger_stats(&self, since: DateTime<Utc>) -> Result<LedgerStats, LedgerError>;
}

/// Atomic write session.
///
/// Dropping a unit of work without committing discards everything it staged
/// and releases its locks.
#[async_trait]
pub trait LedgerUnitOfWork: Send + Sized {
    /// Takes exclusive access to the wallet and returns its current state.
    ///
    /// Callers locking several wallets must do so in ascending id order.
    ///
    /// # Errors
    ///
    /// `WalletNotFound` if absent, `Cancelled` if `cancel` fires first.
    async fn lock_wallet(
        &mut self,
        wallet_id: WalletId,
        cancel: &CancellationToken,
    ) -> Result<Wallet, LedgerError>;

    /// Looks up `key` as seen from inside this unit of work.
    async fn find_by_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<WalletTransaction>, LedgerError>;

    /// Stages a transaction and the matching balance update on a locked wallet.
    ///
    /// # Errors
    ///
    /// `DuplicateKey` when the idempotency key is taken; `Store` on a
    /// persistence failure, after which the unit must be abandoned.
    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
        created_at: DateTime<Utc>,
    ) -> Result<WalletTransaction, LedgerError>;

    /// Makes every staged change visible at once.
    async fn commit(self) -> Result<(), LedgerError>;

    /// Discards every staged change.
    async fn rollback(self) -> Result<(), LedgerError>;
}
