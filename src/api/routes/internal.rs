//! Service-to-service handlers: booking events, signups and health.

use crate::{
    api::{AppState, cache::ADMIN_SCOPE, error::ApiError},
    core::{
        booking::{self, BookingEvent, BridgeOutcome},
        referral,
        reward::RewardOutcome,
    },
    entities::referral_record,
};
use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

/// Acknowledgement returned for a booking event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingEventAck {
    /// Booking the event was about
    pub booking_id: String,
    /// What the event led to
    pub outcome: &'static str,
    /// Referral involved, if any
    pub referral_id: Option<i64>,
}

impl BookingEventAck {
    fn new(booking_id: &str, outcome: &BridgeOutcome) -> Self {
        let (outcome, referral_id) = match outcome {
            BridgeOutcome::Ignored { .. } => ("ignored", None),
            BridgeOutcome::Forwarded(reward) => match reward {
                RewardOutcome::Rewarded { referral, .. } => ("rewarded", Some(referral.id)),
                RewardOutcome::AlreadyRewarded { referral_id } => {
                    ("already_rewarded", Some(*referral_id))
                }
                RewardOutcome::ReferralCancelled { referral_id } => {
                    ("referral_cancelled", Some(*referral_id))
                }
                RewardOutcome::NoReferral => ("no_referral", None),
                RewardOutcome::NotFirstBooking { .. } => ("not_first_booking", None),
            },
        };
        Self {
            booking_id: booking_id.to_string(),
            outcome,
            referral_id,
        }
    }
}

/// Body of `POST /internal/signups`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    /// Code entered at signup
    pub referral_code: String,
    /// The newly registered user
    pub user_id: String,
}

/// `POST /internal/booking-events`
pub async fn booking_events(
    State(state): State<AppState>,
    Json(event): Json<BookingEvent>,
) -> Result<Json<BookingEventAck>, ApiError> {
    let outcome = booking::handle_event(&*state.db, &event).await?;

    if let BridgeOutcome::Forwarded(RewardOutcome::Rewarded { referral, .. }) = &outcome {
        state
            .cache
            .invalidate(&[
                referral.referrer_id.as_str(),
                referral.referred_id.as_str(),
                ADMIN_SCOPE,
            ])
            .await;
    }

    Ok(Json(BookingEventAck::new(&event.booking_id, &outcome)))
}

/// `POST /internal/signups`
pub async fn signups(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> Result<(StatusCode, Json<referral_record::Model>), ApiError> {
    let record = referral::register_referral(
        &*state.db,
        &body.referral_code,
        body.user_id.trim(),
        state.settings.rewards.referral_reward_amount,
    )
    .await?;

    state
        .cache
        .invalidate(&[record.referrer_id.as_str(), ADMIN_SCOPE])
        .await;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            warn!(error = %e, "health check could not reach storage");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded" })),
            )
        }
    }
}
