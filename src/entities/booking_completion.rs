//! Booking completion entity - Completed-booking notifications received from the booking system.
//!
//! Rows are keyed by the external `booking_id`; duplicate deliveries keep the first row.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Booking completion database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "booking_completions")]
pub struct Model {
    /// Surrogate key
    #[sea_orm(primary_key)]
    pub id: i64,
    /// External booking id
    #[sea_orm(unique)]
    pub booking_id: String,
    /// User who made the booking
    #[sea_orm(indexed)]
    pub user_id: String,
    /// When the booking system says the booking completed
    pub completed_at: DateTimeUtc,
    /// When this service first saw the event
    pub recorded_at: DateTimeUtc,
}

/// Booking completions have no modelled relations.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
