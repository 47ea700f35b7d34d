//! PostgreSQL ledger store.
//!
//! Exclusive access is a `SELECT ... FOR UPDATE` on the wallet row inside a
//! database transaction. The `(wallet_id, kind, reference)` unique constraint
//! backs idempotency even if two writers ever get past the row lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Condition, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use tokio_util::sync::CancellationToken;
use walletpoint_core::ledger::{
    IdempotencyKey, LedgerError, LedgerStats, LedgerStore, LedgerTotals, LedgerUnitOfWork,
    NewTransaction, TransactionCursor, TransactionKind, Wallet, WalletTransaction,
};
use walletpoint_shared::types::{PageRequest, TransactionId, UserId, WalletId};

use crate::entities::sea_orm_active_enums::WalletTransactionKind;
use crate::entities::{wallet_transactions, wallets};

/// Maps a database error onto the ledger's error kinds.
///
/// Unique violations become `DuplicateKey` and oversized values (SQLSTATE
/// 22001) become `InvalidRequest`; everything else is a transient `Store`
/// failure.
#[must_use]
pub fn store_error(err: DbErr) -> LedgerError {
    tracing::debug!(error = %err, "database error");
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => LedgerError::DuplicateKey,
        _ if err.to_string().contains(VALUE_TOO_LONG) => {
            LedgerError::InvalidRequest(err.to_string())
        }
        _ => LedgerError::Store(err.to_string()),
    }
}

/// Message Postgres attaches to SQLSTATE 22001.
const VALUE_TOO_LONG: &str = "value too long for type";

/// [`LedgerStore`] over a `SeaORM` connection pool.
#[derive(Debug, Clone)]
pub struct SeaLedgerStore {
    db: DatabaseConnection,
}

impl SeaLedgerStore {
    /// Creates a new store.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn key_filter(key: &IdempotencyKey) -> Condition {
    Condition::all()
        .add(wallet_transactions::Column::WalletId.eq(key.wallet_id.into_inner()))
        .add(wallet_transactions::Column::Kind.eq(WalletTransactionKind::from(key.kind)))
        .add(wallet_transactions::Column::Reference.eq(key.reference.as_str()))
}

/// Rows strictly after `cursor` in `(created_at, id)` order.
fn after_cursor(cursor: TransactionCursor) -> Condition {
    Condition::any()
        .add(wallet_transactions::Column::CreatedAt.gt(cursor.created_at))
        .add(
            Condition::all()
                .add(wallet_transactions::Column::CreatedAt.eq(cursor.created_at))
                .add(wallet_transactions::Column::Id.gt(cursor.id.into_inner())),
        )
}

fn non_negative(count: i64) -> u64 {
    u64::try_from(count).unwrap_or_default()
}

#[async_trait]
impl LedgerStore for SeaLedgerStore {
    type UnitOfWork = SeaUnitOfWork;

    async fn begin(&self) -> Result<SeaUnitOfWork, LedgerError> {
        let txn = self.db.begin().await.map_err(store_error)?;
        Ok(SeaUnitOfWork {
            txn,
            locked: HashMap::new(),
        })
    }

    async fn create_wallet(&self, owner_id: UserId) -> Result<Wallet, LedgerError> {
        let wallet = Wallet::open(owner_id);
        let model = wallets::ActiveModel {
            id: Set(wallet.id.into_inner()),
            owner_id: Set(owner_id.into_inner()),
            balance: Set(wallet.balance),
            version: Set(wallet.version),
            created_at: Set(wallet.created_at.into()),
            updated_at: Set(wallet.updated_at.into()),
        };

        match model.insert(&self.db).await {
            Ok(inserted) => Ok(inserted.into()),
            Err(err) => match store_error(err) {
                LedgerError::DuplicateKey => Err(LedgerError::WalletAlreadyExists(owner_id)),
                other => Err(other),
            },
        }
    }

    async fn find_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>, LedgerError> {
        let model = wallets::Entity::find_by_id(wallet_id.into_inner())
            .one(&self.db)
            .await
            .map_err(store_error)?;
        Ok(model.map(Into::into))
    }

    async fn find_wallet_by_owner(&self, owner_id: UserId) -> Result<Option<Wallet>, LedgerError> {
        let model = wallets::Entity::find()
            .filter(wallets::Column::OwnerId.eq(owner_id.into_inner()))
            .one(&self.db)
            .await
            .map_err(store_error)?;
        Ok(model.map(Into::into))
    }

    async fn list_wallets(&self, page: &PageRequest) -> Result<(Vec<Wallet>, u64), LedgerError> {
        let total = wallets::Entity::find()
            .count(&self.db)
            .await
            .map_err(store_error)?;

        let models = wallets::Entity::find()
            .order_by_asc(wallets::Column::CreatedAt)
            .order_by_asc(wallets::Column::Id)
            .offset(page.offset())
            .limit(page.limit())
            .all(&self.db)
            .await
            .map_err(store_error)?;

        Ok((models.into_iter().map(Into::into).collect(), total))
    }

    async fn find_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<WalletTransaction>, LedgerError> {
        let model = wallet_transactions::Entity::find_by_id(transaction_id.into_inner())
            .one(&self.db)
            .await
            .map_err(store_error)?;
        Ok(model.map(Into::into))
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<WalletTransaction>, LedgerError> {
        let model = wallet_transactions::Entity::find()
            .filter(key_filter(key))
            .one(&self.db)
            .await
            .map_err(store_error)?;
        Ok(model.map(Into::into))
    }

    async fn list_transactions(
        &self,
        wallet_id: WalletId,
        after: Option<TransactionCursor>,
        limit: u64,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let mut query = wallet_transactions::Entity::find()
            .filter(wallet_transactions::Column::WalletId.eq(wallet_id.into_inner()));

        if let Some(cursor) = after {
            query = query.filter(after_cursor(cursor));
        }

        let models = query
            .order_by_asc(wallet_transactions::Column::CreatedAt)
            .order_by_asc(wallet_transactions::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(store_error)?;

        Ok(models.into_iter().map(Into::into).collect())
    }

    async fn list_all_transactions(
        &self,
        kind: Option<TransactionKind>,
        after: Option<TransactionCursor>,
        limit: u64,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let mut query = wallet_transactions::Entity::find();
        if let Some(kind) = kind {
            query = query.filter(wallet_transactions::Column::Kind.eq(WalletTransactionKind::from(kind)));
        }
        if let Some(cursor) = after {
            query = query.filter(after_cursor(cursor));
        }

        let models = query
            .order_by_asc(wallet_transactions::Column::CreatedAt)
            .order_by_asc(wallet_transactions::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(store_error)?;

        Ok(models.into_iter().map(Into::into).collect())
    }

    async fn ledger_totals(&self, wallet_id: WalletId) -> Result<LedgerTotals, LedgerError> {
        let totals: Option<(i64, i64)> = wallet_transactions::Entity::find()
            .select_only()
            .column_as(Expr::cust("COALESCE(SUM(delta), 0)::BIGINT"), "sum")
            .column_as(Expr::cust("COUNT(*)"), "count")
            .filter(wallet_transactions::Column::WalletId.eq(wallet_id.into_inner()))
            .into_tuple()
            .one(&self.db)
            .await
            .map_err(store_error)?;

        let (sum, count) = totals.unwrap_or_default();
        Ok(LedgerTotals {
            sum,
            count: non_negative(count),
        })
    }

    async fn ledger_stats(&self, since: DateTime<Utc>) -> Result<LedgerStats, LedgerError> {
        let circulation: Option<(i64, i64)> = wallets::Entity::find()
            .select_only()
            .column_as(Expr::cust("COUNT(*)"), "wallet_count")
            .column_as(Expr::cust("COALESCE(SUM(balance), 0)::BIGINT"), "circulation_points")
            .into_tuple()
            .one(&self.db)
            .await
            .map_err(store_error)?;

        let activity: Option<(i64, i64, i64)> = wallet_transactions::Entity::find()
            .select_only()
            .column_as(Expr::cust("COUNT(*)"), "transactions")
            .column_as(
                Expr::cust("COALESCE(SUM(delta) FILTER (WHERE delta > 0), 0)::BIGINT"),
                "credits",
            )
            .column_as(
                Expr::cust("COALESCE(-SUM(delta) FILTER (WHERE delta < 0), 0)::BIGINT"),
                "debits",
            )
            .filter(wallet_transactions::Column::CreatedAt.gte(since))
            .into_tuple()
            .one(&self.db)
            .await
            .map_err(store_error)?;

        let (wallet_count, circulation_points) = circulation.unwrap_or_default();
        let (transactions, credits, debits) = activity.unwrap_or_default();
        Ok(LedgerStats {
            wallet_count: non_negative(wallet_count),
            circulation_points,
            since,
            today_transactions: non_negative(transactions),
            today_credits: credits,
            today_debits: debits,
        })
    }
}

/// Unit of work over one database transaction.
///
/// Dropping it without commit rolls the database transaction back.
pub struct SeaUnitOfWork {
    txn: DatabaseTransaction,
    locked: HashMap<WalletId, Wallet>,
}

impl std::fmt::Debug for SeaUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeaUnitOfWork")
            .field("locked", &self.locked.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LedgerUnitOfWork for SeaUnitOfWork {
    async fn lock_wallet(
        &mut self,
        wallet_id: WalletId,
        cancel: &CancellationToken,
    ) -> Result<Wallet, LedgerError> {
        if let Some(wallet) = self.locked.get(&wallet_id) {
            return Ok(wallet.clone());
        }
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }

        let query = wallets::Entity::find_by_id(wallet_id.into_inner())
            .lock_exclusive()
            .one(&self.txn);

        let model = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LedgerError::Cancelled),
            result = query => result.map_err(store_error)?,
        };

        let wallet: Wallet = model.ok_or(LedgerError::WalletNotFound(wallet_id))?.into();
        self.locked.insert(wallet_id, wallet.clone());
        Ok(wallet)
    }

    async fn find_by_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<WalletTransaction>, LedgerError> {
        let model = wallet_transactions::Entity::find()
            .filter(key_filter(key))
            .one(&self.txn)
            .await
            .map_err(store_error)?;
        Ok(model.map(Into::into))
    }

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
        created_at: DateTime<Utc>,
    ) -> Result<WalletTransaction, LedgerError> {
        let wallet_id = transaction.wallet_id;
        let wallet = self
            .locked
            .get_mut(&wallet_id)
            .ok_or_else(|| LedgerError::Integrity(format!("wallet {wallet_id} is not locked")))?;

        let record = transaction.into_record(created_at);
        wallet_transactions::ActiveModel {
            id: Set(record.id.into_inner()),
            wallet_id: Set(wallet_id.into_inner()),
            delta: Set(record.delta),
            kind: Set(record.kind.into()),
            reference: Set(record.reference.clone()),
            balance_after: Set(record.balance_after),
            description: Set(record.description.clone()),
            actor_id: Set(record.actor_id.map(UserId::into_inner)),
            created_at: Set(created_at.into()),
        }
        .insert(&self.txn)
        .await
        .map_err(store_error)?;

        let updated = wallets::Entity::update_many()
            .col_expr(wallets::Column::Balance, Expr::value(record.balance_after))
            .col_expr(wallets::Column::Version, Expr::col(wallets::Column::Version).add(1))
            .col_expr(wallets::Column::UpdatedAt, Expr::value(created_at))
            .filter(wallets::Column::Id.eq(wallet_id.into_inner()))
            .filter(wallets::Column::Version.eq(wallet.version))
            .exec(&self.txn)
            .await
            .map_err(store_error)?;

        if updated.rows_affected != 1 {
            return Err(LedgerError::Store(format!(
                "concurrent modification of wallet {wallet_id}"
            )));
        }

        wallet.balance = record.balance_after;
        wallet.version += 1;
        wallet.updated_at = created_at;
        Ok(record)
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.txn.commit().await.map_err(store_error)
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.txn.rollback().await.map_err(store_error)
    }
}
