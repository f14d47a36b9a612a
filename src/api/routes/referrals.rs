//! `/referrals/*` handlers.

use crate::{
    api::{AppState, Caller, ListQuery, cache::ADMIN_SCOPE, error::ApiError},
    core::{
        analytics::{self, GlobalStats},
        ledger,
        pagination::{Page, PageRequest},
        referral::{self, ReferralFilter},
        reward::{Party, party_key},
    },
    entities::{ReferralStatus, referral_record, wallet_transaction},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};
use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};

/// Entries in the admin activity feed.
const RECENT_ACTIVITY_LIMIT: u64 = 20;

/// A user's shareable referral link
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralLink {
    /// The user's referral code
    pub referral_code: String,
    /// Signup URL carrying the code
    pub share_url: String,
}

/// One person the caller referred, with what the caller earned from them
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitee {
    /// Referral record id
    pub referral_id: i64,
    /// The referred user
    pub referred_id: String,
    /// Current referral status
    pub status: ReferralStatus,
    /// Signup time
    pub created_at: DateTime<Utc>,
    /// Payout time, if completed
    pub completed_at: Option<DateTime<Utc>>,
    /// What the caller was credited for this referral
    pub reward_earned: i64,
}

/// Admin overview of the whole program
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOverview {
    /// Platform-wide counters
    pub stats: GlobalStats,
    /// Paged referral records
    pub referrals: Page<referral_record::Model>,
    /// Newest reward credits
    pub recent_activity: Vec<wallet_transaction::Model>,
}

/// Optional body for the cancel endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelRequest {
    /// Why the referral is being cancelled
    #[serde(default)]
    pub reason: Option<String>,
}

/// `GET /referrals/stats`
pub async fn stats(State(state): State<AppState>, caller: Caller) -> Result<Response, ApiError> {
    let result = analytics::stats_for(&*state.db, &caller.user_id).await;
    state.cache.serve(&caller.user_id, "stats", result).await
}

/// `GET /referrals/link` - issues the caller's code on first use.
pub async fn link(State(state): State<AppState>, caller: Caller) -> Result<Response, ApiError> {
    let codes = &state.settings.referral_codes;
    let result = referral::generate_code(&*state.db, &caller.user_id, codes)
        .await
        .map(|code| ReferralLink {
            share_url: share_url(&state.settings.server.share_base_url, &code),
            referral_code: code,
        });
    state.cache.serve(&caller.user_id, "link", result).await
}

/// `GET /referrals/invitees`
pub async fn invitees(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let request = state.page_request(&query);
    let filter = ReferralFilter {
        status: query.status,
    };
    let result = invitee_page(&*state.db, &caller.user_id, filter, request).await;
    let key = query.cache_key("invitees", request);
    state.cache.serve(&caller.user_id, &key, result).await
}

/// `GET /referrals/admin/all`
pub async fn admin_all(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    caller.require_admin()?;
    let request = state.page_request(&query);
    let filter = ReferralFilter {
        status: query.status,
    };
    let result = admin_overview(&*state.db, filter, request).await;
    let key = query.cache_key("all", request);
    state.cache.serve(ADMIN_SCOPE, &key, result).await
}

/// `POST /referrals/admin/:id/cancel`
pub async fn cancel(
    State(state): State<AppState>,
    caller: Caller,
    Path(referral_id): Path<i64>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<referral_record::Model>, ApiError> {
    caller.require_admin()?;
    let reason = body
        .and_then(|Json(body)| body.reason)
        .unwrap_or_else(|| format!("cancelled by {}", caller.user_id));

    let cancelled = referral::cancel(&*state.db, referral_id, &reason).await?;
    state
        .cache
        .invalidate(&[
            cancelled.referrer_id.as_str(),
            cancelled.referred_id.as_str(),
            ADMIN_SCOPE,
        ])
        .await;
    Ok(Json(cancelled))
}

/// Builds the share URL for a code.
#[must_use]
pub fn share_url(base: &str, code: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}ref={code}")
}

async fn invitee_page<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    filter: ReferralFilter,
    request: PageRequest,
) -> crate::errors::Result<Page<Invitee>> {
    let page = referral::list_referrals_for(db, user_id, filter, request).await?;

    let mut items = Vec::with_capacity(page.items.len());
    for record in &page.items {
        let key = party_key(record.id, Party::Referrer);
        let reward_earned = ledger::find_by_idempotency_key(db, &key)
            .await?
            .map_or(0, |tx| tx.amount);
        items.push(Invitee {
            referral_id: record.id,
            referred_id: record.referred_id.clone(),
            status: record.status,
            created_at: record.created_at,
            completed_at: record.completed_at,
            reward_earned,
        });
    }

    Ok(Page {
        items,
        page: page.page,
        per_page: page.per_page,
        total_items: page.total_items,
        total_pages: page.total_pages,
    })
}

async fn admin_overview<C: ConnectionTrait>(
    db: &C,
    filter: ReferralFilter,
    request: PageRequest,
) -> crate::errors::Result<AdminOverview> {
    Ok(AdminOverview {
        stats: analytics::global_stats(db).await?,
        referrals: referral::list_all(db, filter, request).await?,
        recent_activity: analytics::recent_activity(db, RECENT_ACTIVITY_LIMIT).await?,
    })
}
