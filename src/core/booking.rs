//! Booking event bridge - Receives booking lifecycle notifications from the booking system.
//!
//! Booking status is an opaque external fact. Only `completed` events are acted on: they
//! are recorded in `booking_completions` (one row per booking, first delivery wins) and
//! then forwarded to the reward engine. Duplicate and out-of-order deliveries are safe
//! because the reward engine is idempotent.

use crate::{
    core::reward::{self, RewardOutcome},
    entities::{BookingCompletion, booking_completion},
    errors::{Error, Result, is_unique_violation},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Booking status as reported by the booking system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Created, not yet confirmed
    Pending,
    /// Confirmed by the provider
    Confirmed,
    /// Trip taken / stay finished
    Completed,
    /// Cancelled by user or provider
    Cancelled,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// A booking lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingEvent {
    /// External booking id
    pub booking_id: String,
    /// User who made the booking
    pub user_id: String,
    /// New booking status
    pub status: BookingStatus,
    /// When the status change happened; defaults to receipt time
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Result of handling one booking event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Status is not `completed`; nothing was done
    Ignored {
        /// The status that was ignored
        status: BookingStatus,
    },
    /// Completion recorded and evaluated by the reward engine
    Forwarded(RewardOutcome),
}

/// Handles one booking lifecycle notification.
pub async fn handle_event<C>(db: &C, event: &BookingEvent) -> Result<BridgeOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    if event.booking_id.trim().is_empty() || event.user_id.trim().is_empty() {
        return Err(Error::Validation {
            message: "Booking events need a booking id and a user id".to_string(),
        });
    }

    if event.status != BookingStatus::Completed {
        debug!(
            booking = %event.booking_id,
            status = %event.status,
            "ignoring non-completed booking event"
        );
        return Ok(BridgeOutcome::Ignored {
            status: event.status,
        });
    }

    let completed_at = event.occurred_at.unwrap_or_else(Utc::now);
    record_completion(db, &event.booking_id, &event.user_id, completed_at).await?;

    let outcome = reward::on_booking_completed(db, &event.user_id, &event.booking_id).await?;
    info!(
        booking = %event.booking_id,
        user = %event.user_id,
        rewarded = outcome.is_rewarded(),
        "booking completion processed"
    );
    Ok(BridgeOutcome::Forwarded(outcome))
}

/// Stores a completed booking. Repeated deliveries return the first stored row.
pub async fn record_completion<C: ConnectionTrait>(
    db: &C,
    booking_id: &str,
    user_id: &str,
    completed_at: DateTime<Utc>,
) -> Result<booking_completion::Model> {
    if let Some(existing) = find_completion(db, booking_id).await? {
        return Ok(checked_replay(existing, user_id));
    }

    let row = booking_completion::ActiveModel {
        booking_id: Set(booking_id.to_string()),
        user_id: Set(user_id.to_string()),
        completed_at: Set(completed_at),
        recorded_at: Set(Utc::now()),
        ..Default::default()
    };

    match row.insert(db).await {
        Ok(stored) => Ok(stored),
        Err(err) if is_unique_violation(&err) => {
            let existing = find_completion(db, booking_id)
                .await?
                .ok_or_else(|| Error::Conflict {
                    message: format!("booking {booking_id} conflicted but no row is visible"),
                })?;
            Ok(checked_replay(existing, user_id))
        }
        Err(err) => Err(err.into()),
    }
}

fn checked_replay(existing: booking_completion::Model, user_id: &str) -> booking_completion::Model {
    if existing.user_id != user_id {
        warn!(
            booking = %existing.booking_id,
            stored_user = %existing.user_id,
            reported_user = %user_id,
            "booking completion replayed with a different user; keeping the first"
        );
    }
    existing
}

/// Looks up a recorded completion by booking id.
pub async fn find_completion<C: ConnectionTrait>(
    db: &C,
    booking_id: &str,
) -> Result<Option<booking_completion::Model>> {
    BookingCompletion::find()
        .filter(booking_completion::Column::BookingId.eq(booking_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Returns the user's earliest completed booking on record.
pub async fn first_completed_booking<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
) -> Result<Option<booking_completion::Model>> {
    BookingCompletion::find()
        .filter(booking_completion::Column::UserId.eq(user_id))
        .order_by_asc(booking_completion::Column::CompletedAt)
        .order_by_asc(booking_completion::Column::Id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Number of completed bookings on record for a user.
pub async fn completed_booking_count<C: ConnectionTrait>(db: &C, user_id: &str) -> Result<u64> {
    BookingCompletion::find()
        .filter(booking_completion::Column::UserId.eq(user_id))
        .count(db)
        .await
        .map_err(Into::into)
}
