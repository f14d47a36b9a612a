//! Wallet transaction entity - The append-only ledger.
//!
//! Each row has an `account_id` (the owning user id), a signed `amount` in minor units,
//! a `tx_type`, a description, an optional `related_referral_id` and a unique
//! `idempotency_key`. Rows are never updated or deleted; corrections are new rows.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of ledger entry
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Reward for a completed referral
    #[sea_orm(string_value = "referral_reward")]
    ReferralReward,
    /// Wallet money spent on a booking
    #[sea_orm(string_value = "booking_payment")]
    BookingPayment,
    /// Money returned for a cancelled booking
    #[sea_orm(string_value = "refund")]
    Refund,
    /// Promotional credit
    #[sea_orm(string_value = "bonus")]
    Bonus,
    /// Manual credit by an administrator
    #[sea_orm(string_value = "admin_credit")]
    AdminCredit,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ReferralReward => "referral_reward",
            Self::BookingPayment => "booking_payment",
            Self::Refund => "refund",
            Self::Bonus => "bonus",
            Self::AdminCredit => "admin_credit",
        })
    }
}

/// Wallet transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallet_transactions")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Unique identifier for the transaction
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Account (user id) this entry belongs to
    #[sea_orm(indexed)]
    pub account_id: String,
    /// Signed amount in minor units (negative for debits)
    pub amount: i64,
    /// Entry type
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Human-readable description
    pub description: String,
    /// Referral this entry pays out, if any
    pub related_referral_id: Option<i64>,
    /// Caller-supplied token; one row per key
    #[sea_orm(unique)]
    pub idempotency_key: String,
    /// When the entry was appended
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `WalletTransaction` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each entry belongs to one account
    #[sea_orm(
        belongs_to = "super::wallet_account::Entity",
        from = "Column::AccountId",
        to = "super::wallet_account::Column::UserId"
    )]
    Account,
    /// Reward entries point at the referral they pay out
    #[sea_orm(
        belongs_to = "super::referral_record::Entity",
        from = "Column::RelatedReferralId",
        to = "super::referral_record::Column::Id"
    )]
    Referral,
}

impl Related<super::wallet_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl Related<super::referral_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Referral.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
