//! Wallet ledger domain types.
//!
//! A wallet's `balance` is a cache of the sum of its transaction deltas. The
//! transaction history is the source of truth and is append-only.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use walletpoint_shared::types::{TransactionId, UserId, WalletId};

/// What caused a balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Marketplace purchase (debit).
    Purchase,
    /// Approved mission reward (credit).
    Reward,
    /// Inverse of an earlier purchase or reward.
    Refund,
    /// Manual admin correction, either direction.
    Adjustment,
    /// Sending leg of a peer-to-peer transfer (debit).
    TransferOut,
    /// Receiving leg of a peer-to-peer transfer (credit).
    TransferIn,
}

impl TransactionKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Purchase,
        Self::Reward,
        Self::Refund,
        Self::Adjustment,
        Self::TransferOut,
        Self::TransferIn,
    ];

    /// Returns the wire/database string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "PURCHASE",
            Self::Reward => "REWARD",
            Self::Refund => "REFUND",
            Self::Adjustment => "ADJUSTMENT",
            Self::TransferOut => "TRANSFER_OUT",
            Self::TransferIn => "TRANSFER_IN",
        }
    }

    /// Only purchases and rewards may be reversed by a refund.
    #[must_use]
    pub const fn is_refundable(self) -> bool {
        matches!(self, Self::Purchase | Self::Reward)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown transaction kind: {s}"))
    }
}

/// Per-user point balance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet ID.
    pub id: WalletId,
    /// Owning user; one wallet per user.
    pub owner_id: UserId,
    /// Cached balance, always `>= 0`.
    pub balance: i64,
    /// Incremented on every committed mutation.
    pub version: i64,
    /// Created at.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// A fresh, empty wallet for `owner_id`.
    #[must_use]
    pub fn open(owner_id: UserId) -> Self {
        let now = Utc::now().trunc_subsecs(6);
        Self {
            id: WalletId::new(),
            owner_id,
            balance: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable record of a single balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    /// Transaction ID (time-ordered).
    pub id: TransactionId,
    /// Wallet the delta applies to.
    pub wallet_id: WalletId,
    /// Signed change; positive is a credit.
    pub delta: i64,
    /// Kind of change.
    pub kind: TransactionKind,
    /// Idempotency reference, unique per `(wallet_id, kind)`.
    pub reference: String,
    /// Balance right after this transaction.
    pub balance_after: i64,
    /// Free text for the history screen.
    pub description: Option<String>,
    /// Who caused the change, when known.
    pub actor_id: Option<UserId>,
    /// Created at.
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// Cursor pointing just past this transaction.
    #[must_use]
    pub fn cursor(&self) -> TransactionCursor {
        TransactionCursor {
            created_at: self.created_at,
            id: self.id,
        }
    }

    /// The idempotency key of this transaction.
    #[must_use]
    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey {
            wallet_id: self.wallet_id,
            kind: self.kind,
            reference: self.reference.clone(),
        }
    }
}

/// Longest accepted idempotency reference, in characters.
pub const MAX_REFERENCE_LEN: usize = 255;

/// `(wallet_id, kind, reference)`: retries carrying the same key collapse
/// into the first committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    /// Wallet.
    pub wallet_id: WalletId,
    /// Kind.
    pub kind: TransactionKind,
    /// Caller-supplied reference.
    pub reference: String,
}

/// A requested balance change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
    /// Target wallet.
    pub wallet_id: WalletId,
    /// How to derive the delta.
    pub change: BalanceChange,
    /// Kind of change.
    pub kind: TransactionKind,
    /// Idempotency reference.
    pub reference: String,
    /// Free text stored with the transaction.
    pub description: Option<String>,
    /// Who is causing the change.
    pub actor_id: Option<UserId>,
}

impl ApplyRequest {
    /// A request applying a fixed `delta`.
    #[must_use]
    pub fn new(
        wallet_id: WalletId,
        delta: i64,
        kind: TransactionKind,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            wallet_id,
            change: BalanceChange::Delta(delta),
            kind,
            reference: reference.into(),
            description: None,
            actor_id: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor_id: UserId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    /// The idempotency key this request will be recorded under.
    #[must_use]
    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey {
            wallet_id: self.wallet_id,
            kind: self.kind,
            reference: self.reference.clone(),
        }
    }
}

/// How a request's delta is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    /// Add this signed amount.
    Delta(i64),
    /// Move the balance to exactly this value; the delta is computed against
    /// the locked pre-state.
    SetTo(i64),
}

/// A transaction ready to be appended, produced by the applier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    /// Wallet.
    pub wallet_id: WalletId,
    /// Signed change.
    pub delta: i64,
    /// Kind.
    pub kind: TransactionKind,
    /// Idempotency reference.
    pub reference: String,
    /// Balance after the change.
    pub balance_after: i64,
    /// Description.
    pub description: Option<String>,
    /// Actor.
    pub actor_id: Option<UserId>,
}

impl NewTransaction {
    /// Materializes the record with a fresh id.
    ///
    /// `created_at` must already be at microsecond precision so cursors built
    /// from it survive a round trip through the database.
    #[must_use]
    pub fn into_record(self, created_at: DateTime<Utc>) -> WalletTransaction {
        WalletTransaction {
            id: TransactionId::new(),
            wallet_id: self.wallet_id,
            delta: self.delta,
            kind: self.kind,
            reference: self.reference,
            balance_after: self.balance_after,
            description: self.description,
            actor_id: self.actor_id,
            created_at,
        }
    }
}

/// Result of an apply call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new transaction was committed.
    Applied(WalletTransaction),
    /// The key was already used; this is the original transaction.
    AlreadyApplied(WalletTransaction),
}

impl ApplyOutcome {
    /// The committed transaction, new or prior.
    #[must_use]
    pub fn transaction(&self) -> &WalletTransaction {
        match self {
            Self::Applied(tx) | Self::AlreadyApplied(tx) => tx,
        }
    }

    /// Consumes the outcome, returning the transaction.
    #[must_use]
    pub fn into_transaction(self) -> WalletTransaction {
        match self {
            Self::Applied(tx) | Self::AlreadyApplied(tx) => tx,
        }
    }

    /// True when nothing changed because of an earlier identical request.
    #[must_use]
    pub const fn is_replay(&self) -> bool {
        matches!(self, Self::AlreadyApplied(_))
    }
}

/// Both legs of a peer-to-peer transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Debit on the sender.
    pub debit: WalletTransaction,
    /// Credit on the receiver.
    pub credit: WalletTransaction,
    /// True when this was a replay of an earlier transfer.
    pub replayed: bool,
}

/// Position in a wallet's history; pages resume strictly after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TransactionCursor {
    /// Creation time of the last seen row.
    pub created_at: DateTime<Utc>,
    /// Id of the last seen row; breaks ties on equal timestamps.
    pub id: TransactionId,
}

impl fmt::Display for TransactionCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.created_at.timestamp_micros(), self.id)
    }
}

impl FromStr for TransactionCursor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (micros, id) = s
            .split_once('_')
            .ok_or_else(|| format!("malformed cursor: {s}"))?;
        let micros: i64 = micros
            .parse()
            .map_err(|_| format!("malformed cursor timestamp: {micros}"))?;
        let created_at = DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| format!("cursor timestamp out of range: {micros}"))?;
        let id = id
            .parse()
            .map_err(|_| format!("malformed cursor id: {id}"))?;
        Ok(Self { created_at, id })
    }
}

/// Cached balance checked against the transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Wallet.
    pub wallet_id: WalletId,
    /// `wallets.balance`.
    pub cached_balance: i64,
    /// Sum of all deltas.
    pub ledger_balance: i64,
    /// Number of transactions summed.
    pub transaction_count: u64,
    /// `cached_balance == ledger_balance`.
    pub consistent: bool,
}
