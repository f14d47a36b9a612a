//! Referral registry business logic - Code issuance, validation and relationship bookkeeping.
//!
//! Each user gets one referral code, issued on first request and never overwritten. A new
//! user who signs up with a code gets exactly one `pending` referral record; the reward
//! engine later completes it, or an administrator cancels it.

use crate::{
    config::settings::CodeSettings,
    core::pagination::{Page, PageRequest, fetch_page},
    entities::{
        ReferralCode, ReferralRecord, ReferralStatus, referral_code, referral_record,
    },
    errors::{Error, Result, is_unique_violation},
};
use chrono::Utc;
use rand::Rng;
use sea_orm::{QueryOrder, Select, Set, prelude::*};
use tracing::{debug, info, warn};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Optional filter for referral listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferralFilter {
    /// Only records in this status
    pub status: Option<ReferralStatus>,
}

impl ReferralFilter {
    /// Filter on a single status.
    #[must_use]
    pub const fn with_status(status: ReferralStatus) -> Self {
        Self {
            status: Some(status),
        }
    }
}

/// Produces a random code of `length` characters from `A-Z0-9`.
#[must_use]
pub fn random_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
        .collect()
}

/// Returns the user's referral code, issuing a random one on first call.
pub async fn generate_code<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    settings: &CodeSettings,
) -> Result<String> {
    let length = settings.length;
    generate_code_with(db, user_id, settings.max_attempts, || random_code(length)).await
}

/// Like [`generate_code`] but with an explicit candidate source.
///
/// Collisions with another user's code are retried up to `max_attempts` times. A
/// concurrent call for the same user converges on whichever code was stored first.
pub async fn generate_code_with<C, F>(
    db: &C,
    user_id: &str,
    max_attempts: u32,
    mut next_candidate: F,
) -> Result<String>
where
    C: ConnectionTrait,
    F: FnMut() -> String,
{
    if user_id.trim().is_empty() {
        return Err(Error::Validation {
            message: "User id cannot be empty".to_string(),
        });
    }

    if let Some(existing) = code_for(db, user_id).await? {
        return Ok(existing);
    }

    for attempt in 1..=max_attempts {
        let candidate = next_candidate();
        let row = referral_code::ActiveModel {
            user_id: Set(user_id.to_string()),
            code: Set(candidate.clone()),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        match row.insert(db).await {
            Ok(stored) => {
                info!(user = %user_id, code = %stored.code, attempt, "referral code issued");
                return Ok(stored.code);
            }
            Err(err) if is_unique_violation(&err) => {
                // Either another request issued this user's code first, or the
                // candidate belongs to someone else.
                if let Some(existing) = code_for(db, user_id).await? {
                    return Ok(existing);
                }
                debug!(user = %user_id, attempt, "referral code collision, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }

    warn!(user = %user_id, attempts = max_attempts, "referral code generation exhausted");
    Err(Error::CodeGenerationConflict {
        user_id: user_id.to_string(),
        attempts: max_attempts,
    })
}

/// Returns the code already issued to a user, if any.
pub async fn code_for<C: ConnectionTrait>(db: &C, user_id: &str) -> Result<Option<String>> {
    Ok(ReferralCode::find()
        .filter(referral_code::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .map(|row| row.code))
}

/// Returns the owner of a code, if the code exists. Lookup is case-insensitive.
pub async fn owner_of<C: ConnectionTrait>(db: &C, code: &str) -> Result<Option<String>> {
    Ok(ReferralCode::find()
        .filter(referral_code::Column::Code.eq(normalize_code(code)))
        .one(db)
        .await?
        .map(|row| row.user_id))
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Records that `referred_id` signed up with `referrer_code`.
///
/// # Errors
/// - [`Error::InvalidCode`] if the code is unknown
/// - [`Error::SelfReferral`] if the code belongs to `referred_id`
/// - [`Error::AlreadyReferred`] if `referred_id` already has a referral record
pub async fn register_referral<C: ConnectionTrait>(
    db: &C,
    referrer_code: &str,
    referred_id: &str,
    reward_amount: i64,
) -> Result<referral_record::Model> {
    if referred_id.trim().is_empty() {
        return Err(Error::Validation {
            message: "Referred user id cannot be empty".to_string(),
        });
    }
    if reward_amount <= 0 {
        return Err(Error::InvalidAmount {
            amount: reward_amount,
        });
    }

    let code = normalize_code(referrer_code);
    let referrer_id = owner_of(db, &code)
        .await?
        .ok_or_else(|| Error::InvalidCode { code: code.clone() })?;

    if referrer_id == referred_id {
        return Err(Error::SelfReferral {
            user_id: referred_id.to_string(),
        });
    }

    if find_by_referred(db, referred_id).await?.is_some() {
        return Err(Error::AlreadyReferred {
            user_id: referred_id.to_string(),
        });
    }

    let record = referral_record::ActiveModel {
        referrer_id: Set(referrer_id),
        referred_id: Set(referred_id.to_string()),
        referral_code: Set(code),
        status: Set(ReferralStatus::Pending),
        reward_amount: Set(reward_amount),
        created_at: Set(Utc::now()),
        completed_at: Set(None),
        cancelled_at: Set(None),
        cancel_reason: Set(None),
        ..Default::default()
    };

    match record.insert(db).await {
        Ok(stored) => {
            info!(
                referral = stored.id,
                referrer = %stored.referrer_id,
                referred = %stored.referred_id,
                "referral registered"
            );
            Ok(stored)
        }
        Err(err) if is_unique_violation(&err) => Err(Error::AlreadyReferred {
            user_id: referred_id.to_string(),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Cancels a pending referral. Administrative action; the record gets no reward.
///
/// Uses `UPDATE ... WHERE status = 'pending'`, so it cannot overwrite a completion that
/// lands concurrently.
pub async fn cancel<C: ConnectionTrait>(
    db: &C,
    referral_id: i64,
    reason: &str,
) -> Result<referral_record::Model> {
    let current = get_referral(db, referral_id)
        .await?
        .ok_or(Error::ReferralNotFound { referral_id })?;

    if current.status != ReferralStatus::Pending {
        return Err(Error::InvalidTransition {
            referral_id,
            from: current.status,
            to: ReferralStatus::Cancelled,
        });
    }

    let reason = reason.trim();
    let update = referral_record::ActiveModel {
        status: Set(ReferralStatus::Cancelled),
        cancelled_at: Set(Some(Utc::now())),
        cancel_reason: Set((!reason.is_empty()).then(|| reason.to_string())),
        ..Default::default()
    };
    let result = ReferralRecord::update_many()
        .set(update)
        .filter(referral_record::Column::Id.eq(referral_id))
        .filter(referral_record::Column::Status.eq(ReferralStatus::Pending))
        .exec(db)
        .await?;

    let updated = get_referral(db, referral_id)
        .await?
        .ok_or(Error::ReferralNotFound { referral_id })?;

    if result.rows_affected == 0 {
        // Lost to a concurrent transition
        return Err(Error::InvalidTransition {
            referral_id,
            from: updated.status,
            to: ReferralStatus::Cancelled,
        });
    }

    info!(referral = referral_id, reason = %reason, "referral cancelled");
    Ok(updated)
}

/// Finds a referral record by id.
pub async fn get_referral<C: ConnectionTrait>(
    db: &C,
    referral_id: i64,
) -> Result<Option<referral_record::Model>> {
    ReferralRecord::find_by_id(referral_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds the referral record for a referred user, in any status.
pub async fn find_by_referred<C: ConnectionTrait>(
    db: &C,
    referred_id: &str,
) -> Result<Option<referral_record::Model>> {
    ReferralRecord::find()
        .filter(referral_record::Column::ReferredId.eq(referred_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds the `pending` referral record for a referred user.
pub async fn find_pending_for_referred<C: ConnectionTrait>(
    db: &C,
    referred_id: &str,
) -> Result<Option<referral_record::Model>> {
    ReferralRecord::find()
        .filter(referral_record::Column::ReferredId.eq(referred_id))
        .filter(referral_record::Column::Status.eq(ReferralStatus::Pending))
        .one(db)
        .await
        .map_err(Into::into)
}

fn filtered(
    select: Select<ReferralRecord>,
    filter: ReferralFilter,
) -> Select<ReferralRecord> {
    let select = match filter.status {
        Some(status) => select.filter(referral_record::Column::Status.eq(status)),
        None => select,
    };
    select
        .order_by_desc(referral_record::Column::CreatedAt)
        .order_by_desc(referral_record::Column::Id)
}

/// Lists the referrals a user made (as referrer), newest first.
pub async fn list_referrals_for<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    filter: ReferralFilter,
    request: PageRequest,
) -> Result<Page<referral_record::Model>> {
    let select = ReferralRecord::find().filter(referral_record::Column::ReferrerId.eq(user_id));
    fetch_page(db, filtered(select, filter), request).await
}

/// Lists all referrals, newest first. Backs the admin view.
pub async fn list_all<C: ConnectionTrait>(
    db: &C,
    filter: ReferralFilter,
    request: PageRequest,
) -> Result<Page<referral_record::Model>> {
    fetch_page(db, filtered(ReferralRecord::find(), filter), request).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[test]
    fn test_random_code_shape() {
        let code = random_code(6);
        assert_eq!(code.len(), 6);
        assert!(
            code.chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }

    #[tokio::test]
    async fn test_generate_code_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = CodeSettings::default();

        let first = generate_code(&db, "alice", &settings).await?;
        let second = generate_code(&db, "alice", &settings).await?;
        assert_eq!(first, second);
        assert_eq!(first.len(), settings.length);
        assert_eq!(code_for(&db, "alice").await?, Some(first.clone()));
        assert_eq!(owner_of(&db, &first).await?, Some("alice".to_string()));

        Ok(())
    }

    #[tokio::test]
    async fn test_generate_code_retries_collisions() -> Result<()> {
        let db = setup_test_db().await?;
        issue_code(&db, "alice", "AB12CD").await?;

        let mut candidates = vec!["ZZ99ZZ".to_string(), "AB12CD".to_string()];
        let code = generate_code_with(&db, "bob", 5, || candidates.pop().unwrap()).await?;
        assert_eq!(code, "ZZ99ZZ");

        Ok(())
    }

    #[tokio::test]
    async fn test_generate_code_conflict_after_bounded_retries() -> Result<()> {
        let db = setup_test_db().await?;
        issue_code(&db, "alice", "AB12CD").await?;

        let mut calls = 0;
        let result = generate_code_with(&db, "bob", 3, || {
            calls += 1;
            "AB12CD".to_string()
        })
        .await;

        assert!(matches!(
            result,
            Err(Error::CodeGenerationConflict { attempts: 3, .. })
        ));
        assert_eq!(calls, 3);
        assert_eq!(code_for(&db, "bob").await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn test_register_referral_creates_pending_record() -> Result<()> {
        let db = setup_test_db().await?;
        issue_code(&db, "alice", "AB12CD").await?;

        let record = register_referral(&db, "AB12CD", "bob", 100).await?;
        assert_eq!(record.referrer_id, "alice");
        assert_eq!(record.referred_id, "bob");
        assert_eq!(record.referral_code, "AB12CD");
        assert_eq!(record.status, ReferralStatus::Pending);
        assert_eq!(record.reward_amount, 100);
        assert!(record.completed_at.is_none());

        // Codes are matched case-insensitively
        let lower = register_referral(&db, "ab12cd", "carol", 100).await?;
        assert_eq!(lower.referrer_id, "alice");

        Ok(())
    }

    #[tokio::test]
    async fn test_register_referral_rejects_unknown_code() -> Result<()> {
        let db = setup_test_db().await?;

        let result = register_referral(&db, "NOPE00", "bob", 100).await;
        assert!(matches!(result, Err(Error::InvalidCode { code }) if code == "NOPE00"));

        Ok(())
    }

    #[tokio::test]
    async fn test_register_referral_rejects_self_referral() -> Result<()> {
        let db = setup_test_db().await?;
        issue_code(&db, "alice", "AB12CD").await?;

        let result = register_referral(&db, "AB12CD", "alice", 100).await;
        assert!(matches!(result, Err(Error::SelfReferral { user_id }) if user_id == "alice"));

        Ok(())
    }

    #[tokio::test]
    async fn test_register_referral_rejects_second_referral() -> Result<()> {
        let db = setup_test_db().await?;
        issue_code(&db, "alice", "AB12CD").await?;
        issue_code(&db, "dave", "DD00DD").await?;

        register_referral(&db, "AB12CD", "bob", 100).await?;
        let again = register_referral(&db, "AB12CD", "bob", 100).await;
        assert!(matches!(again, Err(Error::AlreadyReferred { .. })));
        let other = register_referral(&db, "DD00DD", "bob", 100).await;
        assert!(matches!(other, Err(Error::AlreadyReferred { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_register_referral_validation_without_storage() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        let result = register_referral(&db, "AB12CD", "", 100).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        let result = register_referral(&db, "AB12CD", "bob", 0).await;
        assert!(matches!(result, Err(Error::InvalidAmount { amount: 0 })));

        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_pending_referral() -> Result<()> {
        let db = setup_test_db().await?;
        let record = setup_referral(&db, "alice", "bob").await?;

        let cancelled = cancel(&db, record.id, "duplicate account").await?;
        assert_eq!(cancelled.status, ReferralStatus::Cancelled);
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("duplicate account"));
        assert!(cancelled.cancelled_at.is_some());
        assert!(cancelled.completed_at.is_none());

        let again = cancel(&db, record.id, "twice").await;
        assert!(matches!(
            again,
            Err(Error::InvalidTransition {
                from: ReferralStatus::Cancelled,
                ..
            })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_completed_referral_fails() -> Result<()> {
        let db = setup_test_db().await?;
        let record = setup_referral(&db, "alice", "bob").await?;
        force_complete(&db, record.id).await?;

        let result = cancel(&db, record.id, "fraud").await;
        assert!(matches!(
            result,
            Err(Error::InvalidTransition {
                from: ReferralStatus::Completed,
                to: ReferralStatus::Cancelled,
                ..
            })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_unknown_referral() -> Result<()> {
        let db = setup_test_db().await?;
        let result = cancel(&db, 404, "x").await;
        assert!(matches!(
            result,
            Err(Error::ReferralNotFound { referral_id: 404 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_listings_filter_and_paginate() -> Result<()> {
        let db = setup_test_db().await?;
        issue_code(&db, "alice", "AB12CD").await?;
        issue_code(&db, "zed", "ZE00ZE").await?;
        for referred in ["u1", "u2", "u3"] {
            register_referral(&db, "AB12CD", referred, 100).await?;
        }
        let other = register_referral(&db, "ZE00ZE", "u4", 100).await?;
        cancel(&db, other.id, "test").await?;

        let mine = list_referrals_for(
            &db,
            "alice",
            ReferralFilter::default(),
            PageRequest::new(0, 2, 10),
        )
        .await?;
        assert_eq!(mine.total_items, 3);
        assert_eq!(mine.items.len(), 2);
        assert_eq!(mine.items[0].referred_id, "u3");

        let all = list_all(&db, ReferralFilter::default(), PageRequest::first(10)).await?;
        assert_eq!(all.total_items, 4);

        let cancelled = list_all(
            &db,
            ReferralFilter::with_status(ReferralStatus::Cancelled),
            PageRequest::first(10),
        )
        .await?;
        assert_eq!(cancelled.total_items, 1);
        assert_eq!(cancelled.items[0].referred_id, "u4");

        Ok(())
    }
}
