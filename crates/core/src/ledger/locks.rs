//! Per-wallet lock manager.
//!
//! One async mutex per wallet, created on first use and forgotten once the
//! last holder releases it. Mutations on the same wallet queue behind each
//! other; different wallets never contend.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use walletpoint_shared::types::WalletId;

use super::error::LedgerError;

/// Exclusive access to one wallet, released on drop.
pub type WalletGuard = OwnedMutexGuard<()>;

/// Lock manager keyed by wallet id.
#[derive(Debug, Default, Clone)]
pub struct WalletLocks {
    locks: Arc<DashMap<WalletId, Arc<Mutex<()>>>>,
}

impl WalletLocks {
    /// Creates an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `wallet_id`.
    ///
    /// Returns `Cancelled` if `cancel` fires while waiting; nothing is held
    /// in that case.
    pub async fn acquire(
        &self,
        wallet_id: WalletId,
        cancel: &CancellationToken,
    ) -> Result<WalletGuard, LedgerError> {
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }

        // Clone out of the map so the shard lock is not held across the await.
        let mutex = self
            .locks
            .entry(wallet_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(LedgerError::Cancelled),
            guard = mutex.lock_owned() => Ok(guard),
        }
    }

    /// Number of wallets with a live mutex.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True when no mutex is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Releases `guard` and forgets the wallet's mutex if nobody else holds
    /// or waits for it.
    ///
    /// Waiters keep their own clone of the mutex, and handing one out goes
    /// through the same shard lock as the removal, so an entry with a single
    /// reference left cannot be in use.
    pub fn release(&self, wallet_id: WalletId, guard: WalletGuard) {
        drop(guard);
        self.locks
            .remove_if(&wallet_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
