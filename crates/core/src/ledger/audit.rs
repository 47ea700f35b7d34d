//! Audit events emitted after committed balance changes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use walletpoint_shared::types::{TransactionId, UserId, WalletId};

use super::types::{TransactionKind, WalletTransaction};

/// One committed balance change, as seen by the audit collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Wallet.
    pub wallet_id: WalletId,
    /// Transaction that was committed.
    pub transaction_id: TransactionId,
    /// Kind of change.
    pub kind: TransactionKind,
    /// Signed change.
    pub delta: i64,
    /// Who caused it, when known.
    pub actor: Option<UserId>,
    /// Commit time.
    pub occurred_at: DateTime<Utc>,
}

impl From<&WalletTransaction> for AuditEvent {
    fn from(tx: &WalletTransaction) -> Self {
        Self {
            wallet_id: tx.wallet_id,
            transaction_id: tx.id,
            kind: tx.kind,
            delta: tx.delta,
            actor: tx.actor_id,
            occurred_at: tx.created_at,
        }
    }
}

/// Audit delivery failure. Never affects the committed transaction.
#[derive(Debug, Error)]
#[error("Audit delivery failed: {0}")]
pub struct AuditError(pub String);

/// Receives audit events after commit.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Delivers one event.
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Writes audit events as structured log records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        tracing::info!(
            target: "walletpoint::audit",
            wallet_id = %event.wallet_id,
            transaction_id = %event.transaction_id,
            kind = %event.kind,
            delta = event.delta,
            actor = ?event.actor,
            occurred_at = %event.occurred_at,
            "wallet transaction committed"
        );
        Ok(())
    }
}
