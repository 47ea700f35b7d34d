//! Indexes behind the ledger-wide transaction feed.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(FEED_INDEXES_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_FEED_INDEXES_SQL).await?;
        Ok(())
    }
}

const FEED_INDEXES_SQL: &str = r"
-- ============================================================
-- Feed across all wallets, optionally filtered by kind
-- ============================================================
CREATE INDEX IF NOT EXISTS idx_wallet_transactions_feed
    ON wallet_transactions(created_at, id);

CREATE INDEX IF NOT EXISTS idx_wallet_transactions_kind_feed
    ON wallet_transactions(kind, created_at, id);
";

const DROP_FEED_INDEXES_SQL: &str = r"
DROP INDEX IF EXISTS idx_wallet_transactions_kind_feed;
DROP INDEX IF EXISTS idx_wallet_transactions_feed;
";
