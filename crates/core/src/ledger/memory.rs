//! Process-local ledger store.
//!
//! Backs tests and single-node deployments. Exclusive access comes from
//! [`WalletLocks`]; committed state sits behind one `RwLock` so a commit
//! publishes all of its rows at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use walletpoint_shared::types::{PageRequest, TransactionId, UserId, WalletId};

use super::error::LedgerError;
use super::locks::{WalletGuard, WalletLocks};
use super::store::{LedgerStats, LedgerStore, LedgerTotals, LedgerUnitOfWork};
use super::types::{
    IdempotencyKey, NewTransaction, TransactionCursor, TransactionKind, Wallet, WalletTransaction,
};

#[derive(Debug, Default)]
struct State {
    wallets: HashMap<WalletId, Wallet>,
    owners: HashMap<UserId, WalletId>,
    history: HashMap<WalletId, Vec<WalletTransaction>>,
    keys: HashMap<IdempotencyKey, TransactionId>,
    by_id: HashMap<TransactionId, (WalletId, usize)>,
}

impl State {
    fn transaction(&self, id: TransactionId) -> Option<&WalletTransaction> {
        let (wallet_id, index) = self.by_id.get(&id)?;
        self.history.get(wallet_id)?.get(*index)
    }

    fn insert(&mut self, tx: WalletTransaction) {
        let history = self.history.entry(tx.wallet_id).or_default();
        self.keys.insert(tx.key(), tx.id);
        self.by_id.insert(tx.id, (tx.wallet_id, history.len()));
        history.push(tx);
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: RwLock<State>,
    locks: WalletLocks,
    failing_commits: AtomicU32,
}

/// In-memory [`LedgerStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

impl MemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` commits fail with a `Store` error, leaving no trace.
    pub fn fail_next_commits(&self, n: u32) {
        self.inner.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Number of wallets with a live mutex.
    #[must_use]
    pub fn tracked_locks(&self) -> usize {
        self.inner.locks.len()
    }

    /// Full committed history of a wallet, oldest first.
    pub async fn history(&self, wallet_id: WalletId) -> Vec<WalletTransaction> {
        let state = self.inner.state.read().await;
        state.history.get(&wallet_id).cloned().unwrap_or_default()
    }

    /// Overwrites a cached balance without writing history.
    ///
    /// Only useful to simulate drift when exercising reconciliation.
    pub async fn corrupt_balance(&self, wallet_id: WalletId, balance: i64) -> Result<(), LedgerError> {
        let mut state = self.inner.state.write().await;
        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        wallet.balance = balance;
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type UnitOfWork = MemoryUnitOfWork;

    async fn begin(&self) -> Result<MemoryUnitOfWork, LedgerError> {
        Ok(MemoryUnitOfWork {
            store: self.clone(),
            guards: Vec::new(),
            locked: HashMap::new(),
            staged: Vec::new(),
        })
    }

    async fn create_wallet(&self, owner_id: UserId) -> Result<Wallet, LedgerError> {
        let mut state = self.inner.state.write().await;
        if state.owners.contains_key(&owner_id) {
            return Err(LedgerError::WalletAlreadyExists(owner_id));
        }
        let wallet = Wallet::open(owner_id);
        state.owners.insert(owner_id, wallet.id);
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn find_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>, LedgerError> {
        Ok(self.inner.state.read().await.wallets.get(&wallet_id).cloned())
    }

    async fn find_wallet_by_owner(&self, owner_id: UserId) -> Result<Option<Wallet>, LedgerError> {
        let state = self.inner.state.read().await;
        Ok(state
            .owners
            .get(&owner_id)
            .and_then(|id| state.wallets.get(id))
            .cloned())
    }

    async fn list_wallets(&self, page: &PageRequest) -> Result<(Vec<Wallet>, u64), LedgerError> {
        let state = self.inner.state.read().await;
        let mut wallets: Vec<&Wallet> = state.wallets.values().collect();
        wallets.sort_by_key(|w| (w.created_at, w.id));

        let total = wallets.len() as u64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);
        let data = wallets.into_iter().skip(offset).take(limit).cloned().collect();
        Ok((data, total))
    }

    async fn find_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<WalletTransaction>, LedgerError> {
        Ok(self.inner.state.read().await.transaction(transaction_id).cloned())
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<WalletTransaction>, LedgerError> {
        let state = self.inner.state.read().await;
        Ok(state.keys.get(key).and_then(|id| state.transaction(*id)).cloned())
    }

    async fn list_transactions(
        &self,
        wallet_id: WalletId,
        after: Option<TransactionCursor>,
        limit: u64,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let state = self.inner.state.read().await;
        let Some(history) = state.history.get(&wallet_id) else {
            return Ok(Vec::new());
        };
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(history
            .iter()
            .filter(|tx| after.is_none_or(|cursor| tx.cursor() > cursor))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_all_transactions(
        &self,
        kind: Option<TransactionKind>,
        after: Option<TransactionCursor>,
        limit: u64,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let state = self.inner.state.read().await;
        let mut rows: Vec<&WalletTransaction> = state
            .history
            .values()
            .flatten()
            .filter(|tx| kind.is_none_or(|kind| tx.kind == kind))
            .filter(|tx| after.is_none_or(|cursor| tx.cursor() > cursor))
            .collect();
        rows.sort_by_key(|tx| tx.cursor());

        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(rows.into_iter().take(limit).cloned().collect())
    }

    async fn ledger_totals(&self, wallet_id: WalletId) -> Result<LedgerTotals, LedgerError> {
        let state = self.inner.state.read().await;
        let history = state.history.get(&wallet_id).map_or(&[][..], Vec::as_slice);
        let sum = history
            .iter()
            .try_fold(0_i64, |acc, tx| acc.checked_add(tx.delta))
            .ok_or_else(|| LedgerError::Integrity(format!("delta sum overflows for wallet {wallet_id}")))?;
        Ok(LedgerTotals {
            sum,
            count: history.len() as u64,
        })
    }

    async fn ledger_stats(&self, since: DateTime<Utc>) -> Result<LedgerStats, LedgerError> {
        let overflow = || LedgerError::Integrity("ledger stats overflow".into());
        let state = self.inner.state.read().await;

        let circulation_points = state
            .wallets
            .values()
            .try_fold(0_i64, |acc, w| acc.checked_add(w.balance))
            .ok_or_else(overflow)?;

        let mut stats = LedgerStats {
            wallet_count: state.wallets.len() as u64,
            circulation_points,
            since,
            today_transactions: 0,
            today_credits: 0,
            today_debits: 0,
        };
        for tx in state.history.values().flatten().filter(|tx| tx.created_at >= since) {
            stats.today_transactions += 1;
            if tx.delta > 0 {
                stats.today_credits = stats.today_credits.checked_add(tx.delta).ok_or_else(overflow)?;
            } else {
                stats.today_debits = stats.today_debits.checked_sub(tx.delta).ok_or_else(overflow)?;
            }
        }
        Ok(stats)
    }
}

/// Unit of work over a [`MemoryLedgerStore`].
///
/// Staged rows live here until commit; the wallet guards are released when
/// the unit is dropped.
#[derive(Debug)]
pub struct MemoryUnitOfWork {
    store: MemoryLedgerStore,
    guards: Vec<(WalletId, WalletGuard)>,
    locked: HashMap<WalletId, Wallet>,
    staged: Vec<WalletTransaction>,
}

#[async_trait]
impl LedgerUnitOfWork for MemoryUnitOfWork {
    async fn lock_wallet(
        &mut self,
        wallet_id: WalletId,
        cancel: &CancellationToken,
    ) -> Result<Wallet, LedgerError> {
        if let Some(wallet) = self.locked.get(&wallet_id) {
            return Ok(wallet.clone());
        }
        if self.store.find_wallet(wallet_id).await?.is_none() {
            return Err(LedgerError::WalletNotFound(wallet_id));
        }

        let guard = self.store.inner.locks.acquire(wallet_id, cancel).await?;

        // Re-read under the lock; the pre-lock read may be stale.
        let wallet = self
            .store
            .find_wallet(wallet_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(wallet_id))?;
        self.guards.push((wallet_id, guard));
        self.locked.insert(wallet_id, wallet.clone());
        Ok(wallet)
    }

    async fn find_by_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<WalletTransaction>, LedgerError> {
        if let Some(tx) = self.staged.iter().find(|tx| tx.key() == *key) {
            return Ok(Some(tx.clone()));
        }
        self.store.find_by_key(key).await
    }

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
        created_at: DateTime<Utc>,
    ) -> Result<WalletTransaction, LedgerError> {
        let wallet_id = transaction.wallet_id;
        let key = IdempotencyKey {
            wallet_id,
            kind: transaction.kind,
            reference: transaction.reference.clone(),
        };
        if LedgerUnitOfWork::find_by_key(self, &key).await?.is_some() {
            return Err(LedgerError::DuplicateKey);
        }

        let wallet = self
            .locked
            .get_mut(&wallet_id)
            .ok_or_else(|| LedgerError::Integrity(format!("wallet {wallet_id} is not locked")))?;
        if wallet.balance.checked_add(transaction.delta) != Some(transaction.balance_after) {
            return Err(LedgerError::Integrity(format!(
                "balance_after {} does not follow from balance {} and delta {}",
                transaction.balance_after, wallet.balance, transaction.delta
            )));
        }

        wallet.balance = transaction.balance_after;
        wallet.version += 1;
        wallet.updated_at = created_at;

        let record = transaction.into_record(created_at);
        self.staged.push(record.clone());
        Ok(record)
    }

    async fn commit(mut self) -> Result<(), LedgerError> {
        if self.store.take_injected_failure() {
            return Err(LedgerError::Store("injected commit failure".into()));
        }

        let mut state = self.store.inner.state.write().await;
        if self.staged.iter().any(|tx| state.keys.contains_key(&tx.key())) {
            return Err(LedgerError::DuplicateKey);
        }
        for tx in std::mem::take(&mut self.staged) {
            state.insert(tx);
        }
        for (id, wallet) in std::mem::take(&mut self.locked) {
            state.wallets.insert(id, wallet);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        Ok(())
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        for (wallet_id, guard) in self.guards.drain(..) {
            self.store.inner.locks.release(wallet_id, guard);
        }
    }
}
