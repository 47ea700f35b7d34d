//! The single path through which every balance mutation passes.
//!
//! For each request, in one unit of work:
//!
//! 1. Lock every touched wallet, in ascending id order.
//! 2. If the idempotency key is already recorded, return that transaction.
//! 3. Resolve the delta and reject it if the balance would go negative.
//! 4. Append the transaction and the new balance together.
//! 5. Commit, releasing the locks.
//!
//! A duplicate-key report from the store means another writer won the race
//! on the same key; the whole unit is rolled back and re-run, and the second
//! pass finds the winner in step 2.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::balance::{next_balance, next_timestamp, resolve_delta};
use super::error::LedgerError;
use super::store::{LedgerStore, LedgerUnitOfWork};
use super::types::{ApplyOutcome, ApplyRequest, MAX_REFERENCE_LEN, NewTransaction, Wallet};

/// Passes through which a lost duplicate-key race is retried as a lookup.
const DUPLICATE_KEY_PASSES: usize = 2;

/// Validates and atomically applies balance changes.
#[derive(Debug, Clone)]
pub struct TransactionApplier<S> {
    store: S,
}

impl<S: LedgerStore> TransactionApplier<S> {
    /// Creates an applier writing to `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Applies one change.
    ///
    /// # Errors
    ///
    /// - `WalletNotFound` if the wallet does not exist
    /// - `InsufficientBalance` if the balance would go negative
    /// - `ZeroDelta` / `InvalidAmount` for a no-op or invalid change
    /// - `InvalidRequest` if the reference is longer than [`MAX_REFERENCE_LEN`]
    /// - `Cancelled` if `cancel` fires before the wallet is locked
    /// - `Store` on a persistence failure; nothing was applied
    pub async fn apply(
        &self,
        request: ApplyRequest,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome, LedgerError> {
        let mut outcomes = self.apply_all(vec![request], cancel).await?;
        outcomes
            .pop()
            .ok_or_else(|| LedgerError::Integrity("apply produced no outcome".into()))
    }

    /// Applies several changes as one unit: all commit or none do.
    ///
    /// Outcomes come back in request order. Either every request is new or
    /// every request is a replay; a mix means a reference was reused for a
    /// different operation and is rejected.
    pub async fn apply_all(
        &self,
        requests: Vec<ApplyRequest>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ApplyOutcome>, LedgerError> {
        if requests.is_empty() {
            return Err(LedgerError::InvalidRequest("no balance changes requested".into()));
        }
        if let Some(request) = requests
            .iter()
            .find(|r| r.reference.chars().count() > MAX_REFERENCE_LEN)
        {
            return Err(LedgerError::InvalidRequest(format!(
                "reference for wallet {} exceeds {MAX_REFERENCE_LEN} characters",
                request.wallet_id
            )));
        }

        let span = tracing::debug_span!(
            "apply",
            wallet_id = %requests[0].wallet_id,
            kind = %requests[0].kind,
            reference = %requests[0].reference,
            legs = requests.len(),
        );

        async move {
            let mut pass = 0;
            loop {
                pass += 1;
                match self.try_apply_all(&requests, cancel).await {
                    Err(LedgerError::DuplicateKey) if pass < DUPLICATE_KEY_PASSES => {
                        tracing::warn!("lost idempotency race, re-reading committed key");
                    }
                    result => return result,
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn try_apply_all(
        &self,
        requests: &[ApplyRequest],
        cancel: &CancellationToken,
    ) -> Result<Vec<ApplyOutcome>, LedgerError> {
        let mut uow = self.store.begin().await?;
        match stage(&mut uow, requests, cancel).await {
            Ok(outcomes) if outcomes.iter().all(ApplyOutcome::is_replay) => {
                uow.rollback().await?;
                for outcome in &outcomes {
                    let tx = outcome.transaction();
                    tracing::warn!(transaction_id = %tx.id, "idempotent replay, returning prior transaction");
                }
                Ok(outcomes)
            }
            Ok(outcomes) if outcomes.iter().any(ApplyOutcome::is_replay) => {
                uow.rollback().await?;
                Err(LedgerError::InvalidRequest(
                    "reference already used by a different operation".into(),
                ))
            }
            Ok(outcomes) => {
                uow.commit().await?;
                for outcome in &outcomes {
                    let tx = outcome.transaction();
                    tracing::info!(
                        transaction_id = %tx.id,
                        wallet_id = %tx.wallet_id,
                        kind = %tx.kind,
                        delta = tx.delta,
                        balance_after = tx.balance_after,
                        "transaction committed"
                    );
                }
                Ok(outcomes)
            }
            Err(err) => {
                // The unit may already be unusable; dropping it discards it too.
                if let Err(rollback_err) = uow.rollback().await {
                    tracing::debug!(error = %rollback_err, "rollback after failed apply");
                }
                if let LedgerError::InsufficientBalance {
                    wallet_id,
                    balance,
                    requested,
                } = &err
                {
                    tracing::warn!(%wallet_id, balance, requested, "insufficient balance");
                }
                Err(err)
            }
        }
    }
}

/// Runs steps 1 to 4 inside `uow`. Nothing is visible until the caller commits.
async fn stage<U: LedgerUnitOfWork>(
    uow: &mut U,
    requests: &[ApplyRequest],
    cancel: &CancellationToken,
) -> Result<Vec<ApplyOutcome>, LedgerError> {
    let mut wallet_ids: Vec<_> = requests.iter().map(|r| r.wallet_id).collect();
    wallet_ids.sort_unstable();
    wallet_ids.dedup();

    let mut wallets: Vec<Wallet> = Vec::with_capacity(wallet_ids.len());
    for wallet_id in wallet_ids {
        wallets.push(uow.lock_wallet(wallet_id, cancel).await?);
    }

    let mut outcomes = Vec::with_capacity(requests.len());
    for request in requests {
        if let Some(existing) = uow.find_by_key(&request.key()).await? {
            outcomes.push(ApplyOutcome::AlreadyApplied(existing));
            continue;
        }

        let wallet = wallets
            .iter_mut()
            .find(|w| w.id == request.wallet_id)
            .ok_or_else(|| LedgerError::Integrity(format!("wallet {} not locked", request.wallet_id)))?;

        let delta = resolve_delta(request.change, wallet.balance)?;
        let balance_after = next_balance(wallet, delta)?;
        let created_at = next_timestamp(wallet.updated_at, Utc::now());

        let tx = uow
            .append_transaction(
                NewTransaction {
                    wallet_id: wallet.id,
                    delta,
                    kind: request.kind,
                    reference: request.reference.clone(),
                    balance_after,
                    description: request.description.clone(),
                    actor_id: request.actor_id,
                },
                created_at,
            )
            .await?;

        wallet.balance = tx.balance_after;
        wallet.version += 1;
        wallet.updated_at = tx.created_at;
        outcomes.push(ApplyOutcome::Applied(tx));
    }

    Ok(outcomes)
}

#[cfg(test)]
#[path = "applier_tests.rs"]
mod tests;
