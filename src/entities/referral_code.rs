//! Referral code entity - One shareable code per user.
//!
//! Codes are issued once and never overwritten. Both the owner and the code are unique.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Referral code database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "referral_codes")]
pub struct Model {
    /// Surrogate key
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the code
    #[sea_orm(unique)]
    pub user_id: String,
    /// The code itself (e.g. `AB12CD`)
    #[sea_orm(unique)]
    pub code: String,
    /// When the code was issued
    pub created_at: DateTimeUtc,
}

/// Referral codes have no modelled relations; users live in another system.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
