//! Referral record entity - The tracked relationship between a referrer and a referred user.
//!
//! A record is created `pending` when a new user signs up with a referral code and moves
//! exactly once to `completed` (reward paid) or `cancelled` (administrative action).
//! `completed_at` is set iff the status is `completed`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a referral record
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    /// Waiting for the referred user's first completed booking
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Reward paid to both parties
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Cancelled by an administrator; no reward
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl ReferralStatus {
    /// Terminal statuses never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Lower-case name as stored and serialized.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Referral record database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "referral_records")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Unique identifier for the referral
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User who owns the referral code
    #[sea_orm(indexed)]
    pub referrer_id: String,
    /// User who signed up with the code; at most one record per referred user
    #[sea_orm(unique)]
    pub referred_id: String,
    /// The code used at signup
    pub referral_code: String,
    /// Lifecycle status
    pub status: ReferralStatus,
    /// Reward paid to each party on completion, in minor units
    pub reward_amount: i64,
    /// When the referral was registered
    pub created_at: DateTimeUtc,
    /// When the reward was paid
    pub completed_at: Option<DateTimeUtc>,
    /// When an administrator cancelled the referral
    pub cancelled_at: Option<DateTimeUtc>,
    /// Reason given for cancellation
    pub cancel_reason: Option<String>,
}

/// Defines relationships between `ReferralRecord` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Reward transactions that reference this referral
    #[sea_orm(has_many = "super::wallet_transaction::Entity")]
    WalletTransactions,
}

impl Related<super::wallet_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WalletTransactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
