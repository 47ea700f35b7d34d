//! Wallet ledger schema.
//!
//! Creates `wallets` and the append-only `wallet_transactions` table, the
//! idempotency index, and the trigger that forbids rewriting history.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: ENUMS
        // ============================================================
        db.execute_unprepared(ENUMS_SQL).await?;

        // ============================================================
        // PART 2: TABLES
        // ============================================================
        db.execute_unprepared(WALLETS_SQL).await?;
        db.execute_unprepared(WALLET_TRANSACTIONS_SQL).await?;

        // ============================================================
        // PART 3: TRIGGERS
        // ============================================================
        db.execute_unprepared(TRIGGERS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_ALL_SQL).await?;
        Ok(())
    }
}

// ============================================================
// SQL CONSTANTS
// ============================================================

const ENUMS_SQL: &str = r"
CREATE TYPE wallet_transaction_kind AS ENUM (
    'PURCHASE',
    'REWARD',
    'REFUND',
    'ADJUSTMENT',
    'TRANSFER_OUT',
    'TRANSFER_IN'
);
";

const WALLETS_SQL: &str = r"
CREATE TABLE wallets (
    id UUID PRIMARY KEY,
    owner_id UUID NOT NULL,
    balance BIGINT NOT NULL DEFAULT 0,
    version BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    CONSTRAINT uq_wallets_owner UNIQUE (owner_id),
    CONSTRAINT chk_wallets_balance_non_negative CHECK (balance >= 0),
    CONSTRAINT chk_wallets_version_non_negative CHECK (version >= 0)
);

CREATE INDEX idx_wallets_created ON wallets(created_at, id);
";

const WALLET_TRANSACTIONS_SQL: &str = r"
CREATE TABLE wallet_transactions (
    id UUID PRIMARY KEY,
    wallet_id UUID NOT NULL REFERENCES wallets(id) ON DELETE RESTRICT,
    delta BIGINT NOT NULL,
    kind wallet_transaction_kind NOT NULL,
    reference VARCHAR(255) NOT NULL,
    balance_after BIGINT NOT NULL,
    description TEXT,
    actor_id UUID,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    CONSTRAINT uq_wallet_transactions_key UNIQUE (wallet_id, kind, reference),
    CONSTRAINT chk_wallet_transactions_delta_non_zero CHECK (delta <> 0),
    CONSTRAINT chk_wallet_transactions_balance_after CHECK (balance_after >= 0)
);

CREATE INDEX idx_wallet_transactions_history
    ON wallet_transactions(wallet_id, created_at, id);
";

const TRIGGERS_SQL: &str = r"
-- ============================================================
-- FUNCTION: prevent_wallet_transaction_modification
-- History is append-only; corrections are new transactions
-- ============================================================
CREATE OR REPLACE FUNCTION prevent_wallet_transaction_modification()
RETURNS TRIGGER AS $$
BEGIN
    RAISE EXCEPTION 'wallet_transactions is append-only. Record a compensating transaction instead.';
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_prevent_wallet_transaction_mod
BEFORE UPDATE OR DELETE ON wallet_transactions
FOR EACH ROW
EXECUTE FUNCTION prevent_wallet_transaction_modification();
";

const DROP_ALL_SQL: &str = r"
DROP TRIGGER IF EXISTS trg_prevent_wallet_transaction_mod ON wallet_transactions;
DROP FUNCTION IF EXISTS prevent_wallet_transaction_modification();
DROP TABLE IF EXISTS wallet_transactions CASCADE;
DROP TABLE IF EXISTS wallets CASCADE;
DROP TYPE IF EXISTS wallet_transaction_kind;
";
