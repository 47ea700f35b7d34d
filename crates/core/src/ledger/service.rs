//! Use-case level ledger operations.
//!
//! Each operation resolves its inputs, delegates the mutation to the
//! [`TransactionApplier`], retries transient store failures, and emits an
//! audit event once the change is committed. Domain errors pass straight
//! through to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use walletpoint_shared::LedgerConfig;
use walletpoint_shared::types::{CursorPage, PageRequest, PageResponse, TransactionId, UserId, WalletId};

use super::applier::TransactionApplier;
use super::audit::{AuditEvent, AuditSink};
use super::balance::{BalanceAccessor, reconcile};
use super::error::LedgerError;
use super::store::{LedgerStats, LedgerStore, LedgerUnitOfWork};
use super::types::{
    ApplyOutcome, ApplyRequest, BalanceChange, IdempotencyKey, Reconciliation, TransactionCursor,
    TransactionKind, TransferReceipt, Wallet, WalletTransaction,
};
use crate::retry::RetryPolicy;

/// A peer-to-peer transfer between two users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Sender.
    pub from_user: UserId,
    /// Receiver.
    pub to_user: UserId,
    /// Points to move, `> 0`.
    pub amount: i64,
    /// Caller-chosen idempotency reference shared by both legs.
    pub reference: String,
    /// Optional note shown on both legs.
    pub note: Option<String>,
}

/// Orchestrates ledger use cases over a store.
pub struct LedgerService<S> {
    store: S,
    applier: TransactionApplier<S>,
    balances: BalanceAccessor<S>,
    retry: RetryPolicy,
    audit: Arc<dyn AuditSink>,
    audit_timeout: Duration,
    max_page_size: u32,
}

impl<S> std::fmt::Debug for LedgerService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerService")
            .field("retry", &self.retry)
            .field("audit_timeout", &self.audit_timeout)
            .field("max_page_size", &self.max_page_size)
            .finish_non_exhaustive()
    }
}

impl<S: LedgerStore + Clone> LedgerService<S> {
    /// Creates a service with default tuning.
    pub fn new(store: S, audit: Arc<dyn AuditSink>) -> Self {
        Self::with_config(store, audit, &LedgerConfig::default())
    }

    /// Creates a service tuned by `config`.
    pub fn with_config(store: S, audit: Arc<dyn AuditSink>, config: &LedgerConfig) -> Self {
        Self {
            applier: TransactionApplier::new(store.clone()),
            balances: BalanceAccessor::new(store.clone()),
            store,
            retry: RetryPolicy::from(config),
            audit,
            audit_timeout: Duration::from_millis(config.audit_timeout_ms),
            max_page_size: config.max_page_size.max(1),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    // ========== Wallets ==========

    /// Returns the user's wallet, creating an empty one on first call.
    pub async fn open_wallet(&self, owner_id: UserId) -> Result<Wallet, LedgerError> {
        let store = &self.store;
        self.retry
            .retry_async(LedgerError::is_retryable, move |_| async move {
                if let Some(wallet) = store.find_wallet_by_owner(owner_id).await? {
                    return Ok(wallet);
                }
                match store.create_wallet(owner_id).await {
                    Ok(wallet) => {
                        tracing::info!(wallet_id = %wallet.id, %owner_id, "wallet opened");
                        Ok(wallet)
                    }
                    // Lost a race with a concurrent open for the same user.
                    Err(LedgerError::WalletAlreadyExists(_)) => store
                        .find_wallet_by_owner(owner_id)
                        .await?
                        .ok_or(LedgerError::WalletNotFoundForUser(owner_id)),
                    Err(err) => Err(err),
                }
            })
            .await
    }

    /// The wallet owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// `WalletNotFoundForUser` if the user has none.
    pub async fn wallet_for_user(&self, owner_id: UserId) -> Result<Wallet, LedgerError> {
        self.store
            .find_wallet_by_owner(owner_id)
            .await?
            .ok_or(LedgerError::WalletNotFoundForUser(owner_id))
    }

    /// The wallet with `wallet_id`.
    pub async fn wallet(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        self.balances.wallet(wallet_id).await
    }

    /// The transaction with `transaction_id`.
    pub async fn transaction(&self, transaction_id: TransactionId) -> Result<WalletTransaction, LedgerError> {
        self.store
            .find_transaction(transaction_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(transaction_id))
    }

    /// Current balance; never older than the caller's own last commit.
    pub async fn get_balance(&self, wallet_id: WalletId) -> Result<i64, LedgerError> {
        self.balances.get_balance(wallet_id).await
    }

    /// One page of wallets for the admin view.
    pub async fn list_wallets(&self, page: &PageRequest) -> Result<PageResponse<Wallet>, LedgerError> {
        let page = page.clamped(self.max_page_size);
        let (wallets, total) = self.store.list_wallets(&page).await?;
        Ok(PageResponse::new(wallets, page.page, page.per_page, total))
    }

    /// A page of the wallet's history, oldest first.
    ///
    /// `limit` is clamped to `1..=max_page_size`.
    pub async fn list_transactions(
        &self,
        wallet_id: WalletId,
        after: Option<TransactionCursor>,
        limit: u32,
    ) -> Result<CursorPage<WalletTransaction>, LedgerError> {
        // Distinguish an unknown wallet from an empty history.
        self.balances.wallet(wallet_id).await?;

        let limit = limit.clamp(1, self.max_page_size);
        let rows = self
            .store
            .list_transactions(wallet_id, after, u64::from(limit) + 1)
            .await?;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(CursorPage::from_overfetch(rows, limit, |tx| tx.cursor().to_string()))
    }

    /// A page of every wallet's history, oldest first, optionally of one kind.
    ///
    /// `limit` is clamped to `1..=max_page_size`.
    pub async fn list_all_transactions(
        &self,
        kind: Option<TransactionKind>,
        after: Option<TransactionCursor>,
        limit: u32,
    ) -> Result<CursorPage<WalletTransaction>, LedgerError> {
        let limit = limit.clamp(1, self.max_page_size);
        let rows = self
            .store
            .list_all_transactions(kind, after, u64::from(limit) + 1)
            .await?;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(CursorPage::from_overfetch(rows, limit, |tx| tx.cursor().to_string()))
    }

    /// Points in circulation and today's activity, with the day starting at
    /// midnight UTC.
    pub async fn ledger_stats(&self) -> Result<LedgerStats, LedgerError> {
        self.store.ledger_stats(start_of_day(Utc::now())).await
    }

    /// Recomputes the balance from history under the wallet lock.
    ///
    /// A divergent wallet is reported, never corrected.
    pub async fn reconcile(
        &self,
        wallet_id: WalletId,
        cancel: &CancellationToken,
    ) -> Result<Reconciliation, LedgerError> {
        let mut uow = self.store.begin().await?;
        let wallet = uow.lock_wallet(wallet_id, cancel).await?;
        let totals = self.store.ledger_totals(wallet_id).await;
        uow.rollback().await?;

        let report = reconcile(&wallet, totals?);
        if report.consistent {
            tracing::debug!(%wallet_id, balance = report.cached_balance, "wallet reconciled");
        } else {
            tracing::error!(
                %wallet_id,
                cached_balance = report.cached_balance,
                ledger_balance = report.ledger_balance,
                transaction_count = report.transaction_count,
                "wallet balance diverges from its history"
            );
        }
        Ok(report)
    }

    // ========== Mutations ==========

    /// Debits `amount` for a marketplace order.
    ///
    /// The reference is `"{product_id}:{order_id}"`, so re-submitting the same
    /// order returns the original debit.
    pub async fn purchase(
        &self,
        user_id: UserId,
        product_id: &str,
        order_id: &str,
        amount: i64,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome, LedgerError> {
        ensure_positive(amount)?;
        let product_id = non_empty("product_id", product_id)?;
        let order_id = non_empty("order_id", order_id)?;
        let wallet = self.wallet_for_user(user_id).await?;

        let request = ApplyRequest::new(
            wallet.id,
            -amount,
            TransactionKind::Purchase,
            format!("{product_id}:{order_id}"),
        )
        .with_description(format!("Purchase of product {product_id}"))
        .with_actor(user_id);

        self.apply(request, cancel).await
    }

    /// Credits `amount` for an approved mission.
    pub async fn reward(
        &self,
        user_id: UserId,
        mission_id: &str,
        amount: i64,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome, LedgerError> {
        ensure_positive(amount)?;
        let mission_id = non_empty("mission_id", mission_id)?;
        let wallet = self.wallet_for_user(user_id).await?;

        let request = ApplyRequest::new(wallet.id, amount, TransactionKind::Reward, mission_id)
            .with_description(format!("Reward for mission {mission_id}"))
            .with_actor(user_id);

        self.apply(request, cancel).await
    }

    /// Reverses a purchase or reward with an inverse `REFUND`.
    ///
    /// # Errors
    ///
    /// - `TransactionNotFound` if the original is not in this wallet
    /// - `NotRefundable` for anything but purchases and rewards
    /// - `AlreadyRefunded` carrying the existing refund
    /// - `InsufficientBalance` when reversing a reward the wallet already spent
    pub async fn refund(
        &self,
        wallet_id: WalletId,
        original_id: TransactionId,
        actor_id: Option<UserId>,
        reason: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<WalletTransaction, LedgerError> {
        let original = self
            .store
            .find_transaction(original_id)
            .await?
            .filter(|tx| tx.wallet_id == wallet_id)
            .ok_or(LedgerError::TransactionNotFound(original_id))?;

        if !original.kind.is_refundable() {
            return Err(LedgerError::NotRefundable {
                transaction_id: original.id,
                kind: original.kind,
            });
        }

        let key = IdempotencyKey {
            wallet_id,
            kind: TransactionKind::Refund,
            reference: original.id.to_string(),
        };
        if let Some(refund) = self.store.find_by_key(&key).await? {
            tracing::warn!(original = %original.id, refund = %refund.id, "transaction already refunded");
            return Err(LedgerError::AlreadyRefunded {
                original: original.id,
                refund: Box::new(refund),
            });
        }

        let mut request = ApplyRequest::new(wallet_id, -original.delta, TransactionKind::Refund, key.reference)
            .with_description(
                reason.map_or_else(|| format!("Refund of {}", original.id), str::to_string),
            );
        request.actor_id = actor_id;

        match self.apply(request, cancel).await? {
            ApplyOutcome::Applied(tx) => Ok(tx),
            // A concurrent refund committed between the check and the lock.
            ApplyOutcome::AlreadyApplied(refund) => Err(LedgerError::AlreadyRefunded {
                original: original.id,
                refund: Box::new(refund),
            }),
        }
    }

    /// Manual correction by an admin; `delta` may be either sign.
    pub async fn admin_adjust(
        &self,
        wallet_id: WalletId,
        delta: i64,
        admin_id: UserId,
        note: &str,
        cancel: &CancellationToken,
    ) -> Result<WalletTransaction, LedgerError> {
        if delta == 0 {
            return Err(LedgerError::ZeroDelta);
        }
        let request = ApplyRequest::new(
            wallet_id,
            delta,
            TransactionKind::Adjustment,
            format!("admin:{}", Uuid::now_v7()),
        )
        .with_description(note)
        .with_actor(admin_id);

        Ok(self.apply(request, cancel).await?.into_transaction())
    }

    /// Forces the balance to `new_balance`, recorded as an adjustment whose
    /// delta is computed under the wallet lock.
    pub async fn reset_balance(
        &self,
        wallet_id: WalletId,
        new_balance: i64,
        admin_id: UserId,
        reason: &str,
        cancel: &CancellationToken,
    ) -> Result<WalletTransaction, LedgerError> {
        if new_balance < 0 {
            return Err(LedgerError::InvalidAmount(new_balance));
        }
        let mut request = ApplyRequest::new(
            wallet_id,
            0,
            TransactionKind::Adjustment,
            format!("reset:{}", Uuid::now_v7()),
        )
        .with_description(format!("Balance reset: {reason}"))
        .with_actor(admin_id);
        request.change = BalanceChange::SetTo(new_balance);

        Ok(self.apply(request, cancel).await?.into_transaction())
    }

    /// Moves points between two users; both legs commit together.
    pub async fn transfer(
        &self,
        request: TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt, LedgerError> {
        ensure_positive(request.amount)?;
        let reference = non_empty("reference", &request.reference)?;
        if request.from_user == request.to_user {
            return Err(LedgerError::SelfTransfer);
        }
        let from = self.wallet_for_user(request.from_user).await?;
        let to = self.wallet_for_user(request.to_user).await?;
        if from.id == to.id {
            return Err(LedgerError::SelfTransfer);
        }

        let note = request.note.clone();
        let debit = ApplyRequest::new(from.id, -request.amount, TransactionKind::TransferOut, reference)
            .with_description(note.clone().unwrap_or_else(|| format!("Transfer to {}", request.to_user)))
            .with_actor(request.from_user);
        let credit = ApplyRequest::new(to.id, request.amount, TransactionKind::TransferIn, reference)
            .with_description(note.unwrap_or_else(|| format!("Transfer from {}", request.from_user)))
            .with_actor(request.from_user);

        let mut outcomes = self.apply_all(vec![debit, credit], cancel).await?.into_iter();
        let (Some(debit), Some(credit)) = (outcomes.next(), outcomes.next()) else {
            return Err(LedgerError::Integrity("transfer produced fewer than two legs".into()));
        };

        Ok(TransferReceipt {
            replayed: debit.is_replay(),
            debit: debit.into_transaction(),
            credit: credit.into_transaction(),
        })
    }

    // ========== Internals ==========

    async fn apply(
        &self,
        request: ApplyRequest,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome, LedgerError> {
        let mut outcomes = self.apply_all(vec![request], cancel).await?;
        outcomes
            .pop()
            .ok_or_else(|| LedgerError::Integrity("apply produced no outcome".into()))
    }

    async fn apply_all(
        &self,
        requests: Vec<ApplyRequest>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ApplyOutcome>, LedgerError> {
        let applier = &self.applier;
        let result = self
            .retry
            .retry_async(LedgerError::is_retryable, move |_| {
                applier.apply_all(requests.clone(), cancel)
            })
            .await;

        match result {
            Ok(outcomes) => {
                for outcome in &outcomes {
                    if let ApplyOutcome::Applied(tx) = outcome {
                        self.emit_audit(tx).await;
                    }
                }
                Ok(outcomes)
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::error!(error = %err, attempts = self.retry.max_attempts, "ledger write failed after retries");
                }
                Err(err)
            }
        }
    }

    async fn emit_audit(&self, tx: &WalletTransaction) {
        let event = AuditEvent::from(tx);
        match tokio::time::timeout(self.audit_timeout, self.audit.record(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(transaction_id = %tx.id, error = %err, "audit delivery failed");
            }
            Err(_) => {
                tracing::warn!(transaction_id = %tx.id, "audit delivery timed out");
            }
        }
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map_or(now, |midnight| midnight.and_utc())
}

fn ensure_positive(amount: i64) -> Result<(), LedgerError> {
    if amount > 0 {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount(amount))
    }
}

fn non_empty<'a>(field: &str, value: &'a str) -> Result<&'a str, LedgerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(LedgerError::InvalidRequest(format!("{field} must not be empty")))
    } else {
        Ok(trimmed)
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
