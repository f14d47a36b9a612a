//! Reward rule engine - Decides when a referral earns money and pays it exactly once.
//!
//! A referral is reward-eligible when it is `pending` and the referred user's booking that
//! just completed is their first completed booking on record. Paying out is one database
//! transaction holding three effects:
//!
//! 1. a `referral_reward` credit to the referrer,
//! 2. a `referral_reward` credit to the referred user,
//! 3. `UPDATE referral_records SET status = 'completed' WHERE id = ? AND status = 'pending'`.
//!
//! If the conditional update touches no rows, another worker (or an administrator) got
//! there first and the transaction is rolled back. Credits use idempotency keys derived
//! from `referral-reward:<id>`, so retrying the whole operation can never pay twice.

use crate::{
    core::{
        booking,
        ledger::{self, Posting},
        referral,
    },
    entities::{
        ReferralRecord, ReferralStatus, TransactionType, referral_record, wallet_transaction,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{Set, TransactionTrait, prelude::*};
use tracing::{debug, info, instrument};

/// Prefix of every referral reward idempotency key.
pub const REWARD_KEY_PREFIX: &str = "referral-reward:";

/// The two parties paid by a completed referral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    /// Owner of the referral code
    Referrer,
    /// User who signed up with the code
    Referred,
}

impl Party {
    const fn suffix(self) -> &'static str {
        match self {
            Self::Referrer => "referrer",
            Self::Referred => "referred",
        }
    }
}

/// Idempotency key identifying the reward for one referral.
#[must_use]
pub fn reward_key(referral_id: i64) -> String {
    format!("{REWARD_KEY_PREFIX}{referral_id}")
}

/// Ledger key for one party's share of a referral reward.
#[must_use]
pub fn party_key(referral_id: i64, party: Party) -> String {
    format!("{}:{}", reward_key(referral_id), party.suffix())
}

/// What happened when a booking completion was evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardOutcome {
    /// Reward paid; the referral is now completed
    Rewarded {
        /// The completed referral record
        referral: referral_record::Model,
        /// Credit to the referrer
        referrer_tx: wallet_transaction::Model,
        /// Credit to the referred user
        referred_tx: wallet_transaction::Model,
    },
    /// The referral was already completed; nothing was written
    AlreadyRewarded {
        /// Referral record id
        referral_id: i64,
    },
    /// The referral was cancelled; no reward is due
    ReferralCancelled {
        /// Referral record id
        referral_id: i64,
    },
    /// The user was not referred by anyone
    NoReferral,
    /// The booking is not the user's first completed booking
    NotFirstBooking {
        /// The booking that is first on record, if any
        first_booking_id: Option<String>,
    },
}

impl RewardOutcome {
    /// True only when this call paid the reward.
    #[must_use]
    pub const fn is_rewarded(&self) -> bool {
        matches!(self, Self::Rewarded { .. })
    }
}

/// Evaluates a completed booking for `user_id` and pays the referral reward if due.
///
/// The first-booking check reads the booking history on every call. Safe to call any
/// number of times for the same booking, concurrently or not.
#[instrument(skip(db))]
pub async fn on_booking_completed<C>(
    db: &C,
    user_id: &str,
    booking_id: &str,
) -> Result<RewardOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    let Some(pending) = referral::find_pending_for_referred(db, user_id).await? else {
        let outcome = match referral::find_by_referred(db, user_id).await? {
            Some(record) if record.status == ReferralStatus::Completed => {
                RewardOutcome::AlreadyRewarded {
                    referral_id: record.id,
                }
            }
            Some(record) => RewardOutcome::ReferralCancelled {
                referral_id: record.id,
            },
            None => RewardOutcome::NoReferral,
        };
        debug!(?outcome, "no pending referral");
        return Ok(outcome);
    };

    let first = booking::first_completed_booking(db, user_id).await?;
    if first.as_ref().map(|b| b.booking_id.as_str()) != Some(booking_id) {
        let first_booking_id = first.map(|b| b.booking_id);
        debug!(first = ?first_booking_id, "booking is not the user's first completed booking");
        return Ok(RewardOutcome::NotFirstBooking { first_booking_id });
    }

    pay_out(db, &pending).await
}

/// Applies the reward for a pending referral as one atomic unit.
///
/// Also used by reconciliation to finish a partially applied reward: credits that
/// already exist are returned by their idempotency keys instead of being written again.
pub async fn pay_out<C>(db: &C, referral: &referral_record::Model) -> Result<RewardOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    if referral.reward_amount <= 0 {
        return Err(Error::InvalidAmount {
            amount: referral.reward_amount,
        });
    }

    let txn = db.begin().await?;

    let referrer_tx = ledger::credit(
        &txn,
        Posting::new(
            referral.referrer_id.as_str(),
            referral.reward_amount,
            TransactionType::ReferralReward,
            format!("Referral reward for inviting {}", referral.referred_id),
            party_key(referral.id, Party::Referrer),
        )
        .for_referral(referral.id),
    )
    .await?;

    let referred_tx = ledger::credit(
        &txn,
        Posting::new(
            referral.referred_id.as_str(),
            referral.reward_amount,
            TransactionType::ReferralReward,
            format!("Welcome reward for joining with code {}", referral.referral_code),
            party_key(referral.id, Party::Referred),
        )
        .for_referral(referral.id),
    )
    .await?;

    let transition = referral_record::ActiveModel {
        status: Set(ReferralStatus::Completed),
        completed_at: Set(Some(Utc::now())),
        ..Default::default()
    };
    let result = ReferralRecord::update_many()
        .set(transition)
        .filter(referral_record::Column::Id.eq(referral.id))
        .filter(referral_record::Column::Status.eq(ReferralStatus::Pending))
        .exec(&txn)
        .await?;

    if result.rows_affected == 0 {
        txn.rollback().await?;
        let current = referral::get_referral(db, referral.id)
            .await?
            .ok_or(Error::ReferralNotFound {
                referral_id: referral.id,
            })?;
        debug!(
            referral = referral.id,
            status = %current.status,
            "referral transitioned concurrently, reward not applied again"
        );
        return Ok(match current.status {
            ReferralStatus::Cancelled => RewardOutcome::ReferralCancelled {
                referral_id: referral.id,
            },
            _ => RewardOutcome::AlreadyRewarded {
                referral_id: referral.id,
            },
        });
    }

    let completed = referral::get_referral(&txn, referral.id)
        .await?
        .ok_or(Error::ReferralNotFound {
            referral_id: referral.id,
        })?;
    txn.commit().await?;

    info!(
        referral = completed.id,
        referrer = %completed.referrer_id,
        referred = %completed.referred_id,
        amount = completed.reward_amount,
        key = %reward_key(completed.id),
        "referral reward paid"
    );

    Ok(RewardOutcome::Rewarded {
        referral: completed,
        referrer_tx,
        referred_tx,
    })
}
