//! `SeaORM` active enums mirroring the Postgres enum types.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use walletpoint_core::ledger::TransactionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "wallet_transaction_kind")]
pub enum WalletTransactionKind {
    #[sea_orm(string_value = "PURCHASE")]
    Purchase,
    #[sea_orm(string_value = "REWARD")]
    Reward,
    #[sea_orm(string_value = "REFUND")]
    Refund,
    #[sea_orm(string_value = "ADJUSTMENT")]
    Adjustment,
    #[sea_orm(string_value = "TRANSFER_OUT")]
    TransferOut,
    #[sea_orm(string_value = "TRANSFER_IN")]
    TransferIn,
}

impl From<TransactionKind> for WalletTransactionKind {
    fn from(kind: TransactionKind) -> Self {
        match kind {
            TransactionKind::Purchase => Self::Purchase,
            TransactionKind::Reward => Self::Reward,
            TransactionKind::Refund => Self::Refund,
            TransactionKind::Adjustment => Self::Adjustment,
            TransactionKind::TransferOut => Self::TransferOut,
            TransactionKind::TransferIn => Self::TransferIn,
        }
    }
}

impl From<WalletTransactionKind> for TransactionKind {
    fn from(kind: WalletTransactionKind) -> Self {
        match kind {
            WalletTransactionKind::Purchase => Self::Purchase,
            WalletTransactionKind::Reward => Self::Reward,
            WalletTransactionKind::Refund => Self::Refund,
            WalletTransactionKind::Adjustment => Self::Adjustment,
            WalletTransactionKind::TransferOut => Self::TransferOut,
            WalletTransactionKind::TransferIn => Self::TransferIn,
        }
    }
}
