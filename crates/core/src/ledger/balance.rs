//! Balance arithmetic and the read-only balance path.
//!
//! The functions here are pure; the applier calls them while it holds the
//! wallet lock, so they always see the latest committed state.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use walletpoint_shared::types::WalletId;

use super::error::LedgerError;
use super::store::{LedgerStore, LedgerTotals};
use super::types::{BalanceChange, Reconciliation, Wallet, WalletTransaction};

/// Resolves a requested change against the locked balance.
///
/// # Errors
///
/// `ZeroDelta` if the change is a no-op, `InvalidAmount` for a negative
/// target balance, `BalanceOverflow` if the delta does not fit.
pub fn resolve_delta(change: BalanceChange, current: i64) -> Result<i64, LedgerError> {
    let delta = match change {
        BalanceChange::Delta(delta) => delta,
        BalanceChange::SetTo(target) => {
            if target < 0 {
                return Err(LedgerError::InvalidAmount(target));
            }
            target.checked_sub(current).ok_or(LedgerError::BalanceOverflow)?
        }
    };
    if delta == 0 {
        return Err(LedgerError::ZeroDelta);
    }
    Ok(delta)
}

/// Balance after applying `delta` to `wallet`.
///
/// # Errors
///
/// `InsufficientBalance` if the result would be negative.
pub fn next_balance(wallet: &Wallet, delta: i64) -> Result<i64, LedgerError> {
    let next = wallet
        .balance
        .checked_add(delta)
        .ok_or(LedgerError::BalanceOverflow)?;
    if next < 0 {
        return Err(LedgerError::InsufficientBalance {
            wallet_id: wallet.id,
            balance: wallet.balance,
            requested: delta.saturating_neg(),
        });
    }
    Ok(next)
}

/// Timestamp for the next transaction on a wallet last touched at `last`.
///
/// Strictly increasing per wallet, so `(created_at, id)` order is commit
/// order even when the clock stalls or steps back.
#[must_use]
pub fn next_timestamp(last: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(6);
    if now > last {
        now
    } else {
        last + Duration::microseconds(1)
    }
}

/// Checks that `history` forms an unbroken chain starting from zero.
///
/// Returns the balance at the end of the chain.
///
/// # Errors
///
/// `Integrity` naming the first transaction that breaks the chain.
pub fn verify_chain(history: &[WalletTransaction]) -> Result<i64, LedgerError> {
    let mut balance: i64 = 0;
    let mut previous: Option<&WalletTransaction> = None;

    for tx in history {
        if tx.delta == 0 {
            return Err(LedgerError::Integrity(format!("transaction {} has zero delta", tx.id)));
        }
        balance = balance
            .checked_add(tx.delta)
            .ok_or_else(|| LedgerError::Integrity(format!("overflow at transaction {}", tx.id)))?;
        if tx.balance_after != balance {
            return Err(LedgerError::Integrity(format!(
                "transaction {} records balance_after {} but the chain gives {balance}",
                tx.id, tx.balance_after
            )));
        }
        if balance < 0 {
            return Err(LedgerError::Integrity(format!(
                "transaction {} drives the balance negative",
                tx.id
            )));
        }
        if let Some(prev) = previous
            && prev.cursor() >= tx.cursor()
        {
            return Err(LedgerError::Integrity(format!(
                "transaction {} is out of order",
                tx.id
            )));
        }
        previous = Some(tx);
    }

    Ok(balance)
}

/// Compares the cached balance against recomputed totals.
#[must_use]
pub fn reconcile(wallet: &Wallet, totals: LedgerTotals) -> Reconciliation {
    Reconciliation {
        wallet_id: wallet.id,
        cached_balance: wallet.balance,
        ledger_balance: totals.sum,
        transaction_count: totals.count,
        consistent: wallet.balance == totals.sum,
    }
}

/// Read path for balances; never takes a wallet lock.
#[derive(Debug, Clone)]
pub struct BalanceAccessor<S> {
    store: S,
}

impl<S: LedgerStore> BalanceAccessor<S> {
    /// Creates an accessor over `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Current committed balance.
    ///
    /// Reads the primary store, so a caller always sees its own commits.
    ///
    /// # Errors
    ///
    /// `WalletNotFound` if the wallet does not exist.
    pub async fn get_balance(&self, wallet_id: WalletId) -> Result<i64, LedgerError> {
        Ok(self.wallet(wallet_id).await?.balance)
    }

    /// Current committed wallet record.
    pub async fn wallet(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        self.store
            .find_wallet(wallet_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(wallet_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{NewTransaction, TransactionKind};
    use rstest::rstest;
    use walletpoint_shared::types::UserId;

    fn wallet_with(balance: i64) -> Wallet {
        let mut wallet = Wallet::open(UserId::new());
        wallet.balance = balance;
        wallet
    }

    fn record(wallet_id: WalletId, delta: i64, balance_after: i64, at: DateTime<Utc>) -> WalletTransaction {
        NewTransaction {
            wallet_id,
            delta,
            kind: TransactionKind::Adjustment,
            reference: format!("ref-{balance_after}-{delta}"),
            balance_after,
            description: None,
            actor_id: None,
        }
        .into_record(at)
    }

    #[rstest]
    #[case(BalanceChange::Delta(10), 0, Ok(10))]
    #[case(BalanceChange::Delta(-5), 100, Ok(-5))]
    #[case(BalanceChange::SetTo(40), 100, Ok(-60))]
    #[case(BalanceChange::SetTo(100), 40, Ok(60))]
    fn test_resolve_delta(#[case] change: BalanceChange, #[case] current: i64, #[case] expected: Result<i64, ()>) {
        assert_eq!(resolve_delta(change, current).map_err(|_| ()), expected);
    }

    #[test]
    fn test_resolve_delta_rejects_zero() {
        assert!(matches!(resolve_delta(BalanceChange::Delta(0), 7), Err(LedgerError::ZeroDelta)));
        assert!(matches!(resolve_delta(BalanceChange::SetTo(7), 7), Err(LedgerError::ZeroDelta)));
    }

    #[test]
    fn test_resolve_delta_rejects_negative_target() {
        assert!(matches!(
            resolve_delta(BalanceChange::SetTo(-1), 7),
            Err(LedgerError::InvalidAmount(-1))
        ));
    }

    #[test]
    fn test_next_balance_debit_within_balance() {
        assert_eq!(next_balance(&wallet_with(100), -30).unwrap(), 70);
        assert_eq!(next_balance(&wallet_with(30), -30).unwrap(), 0);
    }

    #[test]
    fn test_next_balance_overdraw() {
        let wallet = wallet_with(20);
        let err = next_balance(&wallet, -50).unwrap_err();
        match err {
            LedgerError::InsufficientBalance {
                wallet_id,
                balance,
                requested,
            } => {
                assert_eq!(wallet_id, wallet.id);
                assert_eq!(balance, 20);
                assert_eq!(requested, 50);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_next_balance_overflow() {
        assert!(matches!(
            next_balance(&wallet_with(i64::MAX), 1),
            Err(LedgerError::BalanceOverflow)
        ));
    }

    #[test]
    fn test_next_timestamp_strictly_increases() {
        let last = Utc::now().trunc_subsecs(6);
        let stalled = next_timestamp(last, last);
        assert_eq!(stalled, last + Duration::microseconds(1));

        let behind = next_timestamp(last, last - Duration::seconds(5));
        assert_eq!(behind, last + Duration::microseconds(1));

        let ahead = last + Duration::seconds(1);
        assert_eq!(next_timestamp(last, ahead), ahead);
    }

    #[test]
    fn test_verify_chain() {
        let wallet_id = WalletId::new();
        let t0 = Utc::now().trunc_subsecs(6);
        let history = vec![
            record(wallet_id, 100, 100, t0),
            record(wallet_id, -30, 70, t0 + Duration::microseconds(1)),
            record(wallet_id, 5, 75, t0 + Duration::microseconds(2)),
        ];
        assert_eq!(verify_chain(&history).unwrap(), 75);
        assert_eq!(verify_chain(&[]).unwrap(), 0);
    }

    #[test]
    fn test_verify_chain_detects_broken_link() {
        let wallet_id = WalletId::new();
        let t0 = Utc::now().trunc_subsecs(6);
        let history = vec![
            record(wallet_id, 100, 100, t0),
            record(wallet_id, -30, 60, t0 + Duration::microseconds(1)),
        ];
        assert!(matches!(verify_chain(&history), Err(LedgerError::Integrity(_))));
    }

    #[test]
    fn test_verify_chain_detects_reordering() {
        let wallet_id = WalletId::new();
        let t0 = Utc::now().trunc_subsecs(6);
        let history = vec![
            record(wallet_id, 100, 100, t0 + Duration::microseconds(5)),
            record(wallet_id, 1, 101, t0),
        ];
        assert!(matches!(verify_chain(&history), Err(LedgerError::Integrity(_))));
    }

    #[test]
    fn test_reconcile() {
        let wallet = wallet_with(70);
        let ok = reconcile(&wallet, LedgerTotals { sum: 70, count: 2 });
        assert!(ok.consistent);
        assert_eq!(ok.transaction_count, 2);

        let drift = reconcile(&wallet, LedgerTotals { sum: 90, count: 3 });
        assert!(!drift.consistent);
        assert_eq!(drift.cached_balance, 70);
        assert_eq!(drift.ledger_balance, 90);
    }
}
