//! `SeaORM` Entity for wallet_transactions table.
//!
//! Rows are insert-only; a database trigger rejects UPDATE and DELETE.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use walletpoint_core::ledger::WalletTransaction;
use walletpoint_shared::types::{TransactionId, UserId, WalletId};

use super::sea_orm_active_enums::WalletTransactionKind;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "wallet_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub delta: i64,
    pub kind: WalletTransactionKind,
    pub reference: String,
    pub balance_after: i64,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::wallets::Entity",
        from = "Column::WalletId",
        to = "super::wallets::Column::Id"
    )]
    Wallets,
}

impl Related<super::wallets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Wallets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for WalletTransaction {
    fn from(model: Model) -> Self {
        Self {
            id: TransactionId::from_uuid(model.id),
            wallet_id: WalletId::from_uuid(model.wallet_id),
            delta: model.delta,
            kind: model.kind.into(),
            reference: model.reference,
            balance_after: model.balance_after,
            description: model.description,
            actor_id: model.actor_id.map(UserId::from_uuid),
            created_at: model.created_at.to_utc(),
        }
    }
}
