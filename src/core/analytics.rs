//! Conversion analytics - Read-only referral and wallet statistics.
//!
//! Everything here is recomputed from `referral_records` and the ledger on each call;
//! there are no stored counters that could drift.

use crate::{
    core::{ledger, referral},
    entities::{
        ReferralRecord, ReferralStatus, TransactionType, WalletTransaction, referral_record,
        wallet_transaction,
    },
    errors::Result,
};
use sea_orm::{QueryOrder, QuerySelect, prelude::*};
use serde::Serialize;

/// Referral statistics for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralStats {
    /// The user's referral code, if one has been issued
    pub referral_code: Option<String>,
    /// Referrals made with the user's code, any status
    pub total_referrals: u64,
    /// Referrals that paid out
    pub completed_referrals: u64,
    /// Sum of `referral_reward` credits on the user's account
    pub total_earnings: i64,
}

/// Platform-wide referral statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    /// All referral records
    pub total_referrals: u64,
    /// Completed referrals
    pub completed_referrals: u64,
    /// Pending referrals
    pub pending_referrals: u64,
    /// Cancelled referrals
    pub cancelled_referrals: u64,
    /// Sum of every `referral_reward` credit in the ledger
    pub total_rewards_paid: i64,
    /// `completed_referrals / total_referrals`, 0 when there are none
    pub conversion_rate: f64,
}

/// Ratio of completed to total referrals; zero when there are no referrals.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn conversion_rate(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    completed as f64 / total as f64
}

async fn count_referrals<C: ConnectionTrait>(
    db: &C,
    referrer_id: Option<&str>,
    status: Option<ReferralStatus>,
) -> Result<u64> {
    let mut select = ReferralRecord::find();
    if let Some(referrer_id) = referrer_id {
        select = select.filter(referral_record::Column::ReferrerId.eq(referrer_id));
    }
    if let Some(status) = status {
        select = select.filter(referral_record::Column::Status.eq(status));
    }
    select.count(db).await.map_err(Into::into)
}

/// Referral statistics for a user. Reads only; never issues a code.
pub async fn stats_for<C: ConnectionTrait>(db: &C, user_id: &str) -> Result<ReferralStats> {
    Ok(ReferralStats {
        referral_code: referral::code_for(db, user_id).await?,
        total_referrals: count_referrals(db, Some(user_id), None).await?,
        completed_referrals: count_referrals(db, Some(user_id), Some(ReferralStatus::Completed))
            .await?,
        total_earnings: ledger::sum_for_type(db, user_id, TransactionType::ReferralReward).await?,
    })
}

/// Platform-wide statistics for the admin view.
pub async fn global_stats<C: ConnectionTrait>(db: &C) -> Result<GlobalStats> {
    let total_referrals = count_referrals(db, None, None).await?;
    let completed_referrals = count_referrals(db, None, Some(ReferralStatus::Completed)).await?;
    let pending_referrals = count_referrals(db, None, Some(ReferralStatus::Pending)).await?;
    let cancelled_referrals = count_referrals(db, None, Some(ReferralStatus::Cancelled)).await?;

    Ok(GlobalStats {
        total_referrals,
        completed_referrals,
        pending_referrals,
        cancelled_referrals,
        total_rewards_paid: ledger::total_for_type(db, TransactionType::ReferralReward).await?,
        conversion_rate: conversion_rate(completed_referrals, total_referrals),
    })
}

/// The newest referral reward credits, for the admin activity feed.
pub async fn recent_activity<C: ConnectionTrait>(
    db: &C,
    limit: u64,
) -> Result<Vec<wallet_transaction::Model>> {
    WalletTransaction::find()
        .filter(wallet_transaction::Column::TxType.eq(TransactionType::ReferralReward))
        .order_by_desc(wallet_transaction::Column::CreatedAt)
        .order_by_desc(wallet_transaction::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}
