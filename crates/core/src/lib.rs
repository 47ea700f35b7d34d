//! Core ledger logic for Wallet Point.
//!
//! This crate contains the ledger rules with ZERO web or SQL dependencies.
//! Storage is reached through the `LedgerStore` trait; an in-memory store
//! ships here and the PostgreSQL one lives in `walletpoint-db`.
//!
//! # Modules
//!
//! - `ledger` - Wallets, transactions, and the mutation path
//! - `retry` - Backoff for transient store failures

pub mod ledger;
pub mod retry;
