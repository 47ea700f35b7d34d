//! Database migrations.
//!
//! Migrations are managed using sea-orm-migration.

pub use sea_orm_migration::prelude::*;

mod m20261015_000001_wallet_ledger;
mod m20261015_000002_transaction_feed;

/// Migrator for running database migrations.
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261015_000001_wallet_ledger::Migration),
            Box::new(m20261015_000002_transaction_feed::Migration),
        ]
    }
}
