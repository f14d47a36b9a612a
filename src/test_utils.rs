//! Shared test utilities.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test entities with sensible defaults.

use crate::{
    core::{booking, ledger::Posting, referral},
    entities::{
        ReferralRecord, ReferralStatus, TransactionType, booking_completion, referral_record,
    },
    errors::Result,
};
use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tracing_subscriber::EnvFilter;

/// Reward amount used by [`setup_referral`].
pub const TEST_REWARD: i64 = 100;

/// Routes `tracing` output through the test harness.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Creates an in-memory `SQLite` database with all tables initialized.
///
/// The pool is pinned to a single connection: every connection to `sqlite::memory:`
/// opens its own empty database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// A `bonus` credit posting.
pub fn bonus(account: &str, amount: i64, key: &str) -> Posting {
    Posting::new(account, amount, TransactionType::Bonus, "Test bonus", key)
}

/// A `booking_payment` debit posting.
pub fn payment(account: &str, amount: i64, key: &str) -> Posting {
    Posting::new(
        account,
        amount,
        TransactionType::BookingPayment,
        "Test booking payment",
        key,
    )
}

/// Issues a fixed referral code to a user.
pub async fn issue_code(db: &DatabaseConnection, user_id: &str, code: &str) -> Result<String> {
    referral::generate_code_with(db, user_id, 1, || code.to_string()).await
}

/// Issues `<REFERRER>CODE` to the referrer and registers `referred` with it.
pub async fn setup_referral(
    db: &DatabaseConnection,
    referrer: &str,
    referred: &str,
) -> Result<referral_record::Model> {
    let code = issue_code(db, referrer, &format!("{}CODE", referrer.to_uppercase())).await?;
    referral::register_referral(db, &code, referred, TEST_REWARD).await
}

/// Moves a referral straight to `completed` without paying anything.
pub async fn force_complete(db: &DatabaseConnection, referral_id: i64) -> Result<()> {
    ReferralRecord::update_many()
        .set(referral_record::ActiveModel {
            status: Set(ReferralStatus::Completed),
            completed_at: Set(Some(Utc::now())),
            ..Default::default()
        })
        .filter(referral_record::Column::Id.eq(referral_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Records a completed booking happening now.
pub async fn complete_booking(
    db: &DatabaseConnection,
    user_id: &str,
    booking_id: &str,
) -> Result<booking_completion::Model> {
    booking::record_completion(db, booking_id, user_id, Utc::now()).await
}
