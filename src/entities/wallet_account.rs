//! Wallet account entity - Running-balance projection per user.
//!
//! The balance here is maintained in the same database transaction as every ledger
//! insert, but the ledger rows in `wallet_transactions` remain the source of truth.
//! See `core::reconcile` for auditing the two against each other.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Wallet account database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallet_accounts")]
pub struct Model {
    /// Surrogate key
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning user; accounts are 1:1 with users
    #[sea_orm(unique)]
    pub user_id: String,
    /// Projected balance in minor units
    pub balance: i64,
    /// When the projection last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `WalletAccount` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One account has many ledger entries
    #[sea_orm(has_many = "super::wallet_transaction::Entity")]
    Transactions,
}

impl Related<super::wallet_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
