//! Wallet-point ledger.
//!
//! - `store` / `memory` - storage boundary and the in-process store
//! - `locks` - per-wallet exclusive access
//! - `balance` - balance arithmetic and the read path
//! - `applier` - the single path for every balance mutation
//! - `service` - purchase, reward, refund, adjustment, transfer
//! - `audit` - post-commit audit events

pub mod applier;
pub mod audit;
pub mod balance;
pub mod error;
pub mod locks;
pub mod memory;
pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
mod applier_props;

pub use applier::TransactionApplier;
pub use audit::{AuditError, AuditEvent, AuditSink, TracingAuditSink};
pub use balance::BalanceAccessor;
pub use error::LedgerError;
pub use locks::{WalletGuard, WalletLocks};
pub use memory::{MemoryLedgerStore, MemoryUnitOfWork};
pub use service::{LedgerService, TransferRequest};
pub use store::{LedgerStats, LedgerStore, LedgerTotals, LedgerUnitOfWork};
pub use types::{
    ApplyOutcome, ApplyRequest, BalanceChange, IdempotencyKey, MAX_REFERENCE_LEN, NewTransaction,
    Reconciliation, TransactionCursor, TransactionKind, TransferReceipt, Wallet, WalletTransaction,
};
