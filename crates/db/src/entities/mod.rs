//! `SeaORM` entities for the wallet ledger tables.

pub mod sea_orm_active_enums;
pub mod wallet_transactions;
pub mod wallets;
