//! Wallet ledger business logic - The single place money moves.
//!
//! Every movement is an append to `wallet_transactions`; rows are never updated or deleted.
//! The `wallet_accounts` balance is a running-total projection maintained in the same
//! database transaction as each append, and the ledger sum stays authoritative.
//!
//! Writes are idempotent per `idempotency_key`. A repeated key returns the stored row
//! unchanged. When two writers race on the same key, the unique index lets exactly one
//! insert through and the loser returns the winner's row.
//!
//! All write functions are generic over the connection so they can run inside an outer
//! database transaction (nested calls become savepoints).

use crate::{
    core::pagination::{Page, PageRequest, fetch_page},
    entities::{
        TransactionType, WalletAccount, WalletTransaction, wallet_account, wallet_transaction,
    },
    errors::{Error, Result, is_unique_violation},
};
use chrono::Utc;
use sea_orm::{
    QueryOrder, QuerySelect, Select, Set, TransactionTrait, prelude::*,
    sea_query::{Expr, OnConflict},
};
use tracing::{debug, info, warn};

/// A requested ledger movement. `amount` is always the positive magnitude; the sign is
/// decided by calling [`credit`] or [`debit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    /// Account (user id) to move money on
    pub account_id: String,
    /// Positive amount in minor units
    pub amount: i64,
    /// Entry type
    pub tx_type: TransactionType,
    /// Human-readable description
    pub description: String,
    /// One ledger row per key
    pub idempotency_key: String,
    /// Referral being paid out, if any
    pub related_referral_id: Option<i64>,
}

impl Posting {
    /// Creates a posting with no related referral.
    pub fn new(
        account_id: impl Into<String>,
        amount: i64,
        tx_type: TransactionType,
        description: impl Into<String>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            amount,
            tx_type,
            description: description.into(),
            idempotency_key: idempotency_key.into(),
            related_referral_id: None,
        }
    }

    /// Links the posting to the referral it pays out.
    #[must_use]
    pub const fn for_referral(mut self, referral_id: i64) -> Self {
        self.related_referral_id = Some(referral_id);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(Error::InvalidAmount {
                amount: self.amount,
            });
        }
        if self.account_id.trim().is_empty() {
            return Err(Error::Validation {
                message: "Account id cannot be empty".to_string(),
            });
        }
        if self.idempotency_key.trim().is_empty() {
            return Err(Error::Validation {
                message: "Idempotency key cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Appends a positive entry to an account, creating the account on first use.
///
/// If a transaction with the same idempotency key already exists, it is returned
/// unchanged and nothing is written.
pub async fn credit<C>(db: &C, posting: Posting) -> Result<wallet_transaction::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    posting.validate()?;

    if let Some(existing) = find_by_idempotency_key(db, &posting.idempotency_key).await? {
        return Ok(replayed(existing, &posting, posting.amount));
    }

    let txn = db.begin().await?;
    ensure_account(&txn, &posting.account_id).await?;

    match append(&txn, &posting, posting.amount).await {
        Ok(row) => {
            adjust_projection(&txn, &posting.account_id, posting.amount).await?;
            txn.commit().await?;
            info!(
                account = %row.account_id,
                amount = row.amount,
                tx_type = %row.tx_type,
                key = %row.idempotency_key,
                "credit applied"
            );
            Ok(row)
        }
        Err(err) if is_unique_violation(&err) => {
            txn.rollback().await?;
            resolve_race(db, &posting, posting.amount).await
        }
        Err(err) => Err(err.into()),
    }
}

/// Appends a negative entry to an account.
///
/// The projected balance is checked and decremented with one conditional update, so a
/// debit that would take the balance below zero fails with
/// [`Error::InsufficientBalance`] and writes nothing.
pub async fn debit<C>(db: &C, posting: Posting) -> Result<wallet_transaction::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    posting.validate()?;
    let signed = -posting.amount;

    if let Some(existing) = find_by_idempotency_key(db, &posting.idempotency_key).await? {
        return Ok(replayed(existing, &posting, signed));
    }

    let txn = db.begin().await?;
    ensure_account(&txn, &posting.account_id).await?;

    // balance = balance - amount WHERE balance >= amount
    let updated = WalletAccount::update_many()
        .col_expr(
            wallet_account::Column::Balance,
            Expr::col(wallet_account::Column::Balance).sub(posting.amount),
        )
        .col_expr(wallet_account::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(wallet_account::Column::UserId.eq(posting.account_id.as_str()))
        .filter(wallet_account::Column::Balance.gte(posting.amount))
        .exec(&txn)
        .await?;

    if updated.rows_affected == 0 {
        let balance = projected_balance(&txn, &posting.account_id).await?;
        txn.rollback().await?;
        warn!(
            account = %posting.account_id,
            balance,
            required = posting.amount,
            "debit rejected: insufficient balance"
        );
        return Err(Error::InsufficientBalance {
            account_id: posting.account_id,
            balance,
            required: posting.amount,
        });
    }

    match append(&txn, &posting, signed).await {
        Ok(row) => {
            txn.commit().await?;
            info!(
                account = %row.account_id,
                amount = row.amount,
                tx_type = %row.tx_type,
                key = %row.idempotency_key,
                "debit applied"
            );
            Ok(row)
        }
        Err(err) if is_unique_violation(&err) => {
            txn.rollback().await?;
            resolve_race(db, &posting, signed).await
        }
        Err(err) => Err(err.into()),
    }
}

/// Returns the balance of an account as the sum of all its ledger entries.
pub async fn get_balance<C: ConnectionTrait>(db: &C, account_id: &str) -> Result<i64> {
    let select =
        WalletTransaction::find().filter(wallet_transaction::Column::AccountId.eq(account_id));
    sum_amounts(db, select).await
}

/// Returns the running-total projection for an account, or zero if it has none yet.
pub async fn projected_balance<C: ConnectionTrait>(db: &C, account_id: &str) -> Result<i64> {
    Ok(find_account(db, account_id)
        .await?
        .map_or(0, |account| account.balance))
}

/// Looks up the projection row for an account.
pub async fn find_account<C: ConnectionTrait>(
    db: &C,
    account_id: &str,
) -> Result<Option<wallet_account::Model>> {
    WalletAccount::find()
        .filter(wallet_account::Column::UserId.eq(account_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists an account's ledger entries, newest first.
pub async fn list_transactions<C: ConnectionTrait>(
    db: &C,
    account_id: &str,
    request: PageRequest,
) -> Result<Page<wallet_transaction::Model>> {
    let select = WalletTransaction::find()
        .filter(wallet_transaction::Column::AccountId.eq(account_id))
        .order_by_desc(wallet_transaction::Column::CreatedAt)
        .order_by_desc(wallet_transaction::Column::Id);
    fetch_page(db, select, request).await
}

/// Finds the entry written under an idempotency key.
pub async fn find_by_idempotency_key<C: ConnectionTrait>(
    db: &C,
    idempotency_key: &str,
) -> Result<Option<wallet_transaction::Model>> {
    WalletTransaction::find()
        .filter(wallet_transaction::Column::IdempotencyKey.eq(idempotency_key))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Sums one entry type on one account (e.g. lifetime referral earnings).
pub async fn sum_for_type<C: ConnectionTrait>(
    db: &C,
    account_id: &str,
    tx_type: TransactionType,
) -> Result<i64> {
    let select = WalletTransaction::find()
        .filter(wallet_transaction::Column::AccountId.eq(account_id))
        .filter(wallet_transaction::Column::TxType.eq(tx_type));
    sum_amounts(db, select).await
}

/// Sums one entry type across every account.
pub async fn total_for_type<C: ConnectionTrait>(db: &C, tx_type: TransactionType) -> Result<i64> {
    let select = WalletTransaction::find().filter(wallet_transaction::Column::TxType.eq(tx_type));
    sum_amounts(db, select).await
}

/// `SELECT SUM(amount)` over the filtered rows; zero when there are none.
async fn sum_amounts<C: ConnectionTrait>(
    db: &C,
    select: Select<WalletTransaction>,
) -> Result<i64> {
    let total: Option<Option<i64>> = select
        .select_only()
        .column_as(Expr::col(wallet_transaction::Column::Amount).sum(), "total")
        .into_tuple()
        .one(db)
        .await?;
    Ok(total.flatten().unwrap_or(0))
}

/// Inserts the projection row for an account if it does not exist yet.
pub async fn ensure_account<C: ConnectionTrait>(db: &C, account_id: &str) -> Result<()> {
    if find_account(db, account_id).await?.is_some() {
        return Ok(());
    }

    let account = wallet_account::ActiveModel {
        user_id: Set(account_id.to_string()),
        balance: Set(0),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    WalletAccount::insert(account)
        .on_conflict(
            OnConflict::column(wallet_account::Column::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    debug!(account = %account_id, "wallet account opened");
    Ok(())
}

async fn append<C: ConnectionTrait>(
    db: &C,
    posting: &Posting,
    signed_amount: i64,
) -> std::result::Result<wallet_transaction::Model, DbErr> {
    wallet_transaction::ActiveModel {
        account_id: Set(posting.account_id.clone()),
        amount: Set(signed_amount),
        tx_type: Set(posting.tx_type),
        description: Set(posting.description.clone()),
        related_referral_id: Set(posting.related_referral_id),
        idempotency_key: Set(posting.idempotency_key.clone()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
}

async fn adjust_projection<C: ConnectionTrait>(
    db: &C,
    account_id: &str,
    amount_delta: i64,
) -> Result<()> {
    WalletAccount::update_many()
        .col_expr(
            wallet_account::Column::Balance,
            Expr::col(wallet_account::Column::Balance).add(amount_delta),
        )
        .col_expr(wallet_account::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(wallet_account::Column::UserId.eq(account_id))
        .exec(db)
        .await?;
    Ok(())
}

async fn resolve_race<C: ConnectionTrait>(
    db: &C,
    posting: &Posting,
    signed_amount: i64,
) -> Result<wallet_transaction::Model> {
    let winner = find_by_idempotency_key(db, &posting.idempotency_key)
        .await?
        .ok_or_else(|| Error::Conflict {
            message: format!(
                "idempotency key '{}' conflicted but no row is visible",
                posting.idempotency_key
            ),
        })?;
    debug!(key = %posting.idempotency_key, "lost insert race, returning winning row");
    Ok(replayed(winner, posting, signed_amount))
}

/// Returns a stored row for a replayed key, flagging replays whose parameters differ.
fn replayed(
    existing: wallet_transaction::Model,
    posting: &Posting,
    signed_amount: i64,
) -> wallet_transaction::Model {
    if existing.account_id != posting.account_id
        || existing.amount != signed_amount
        || existing.tx_type != posting.tx_type
    {
        warn!(
            key = %posting.idempotency_key,
            stored_account = %existing.account_id,
            stored_amount = existing.amount,
            requested_account = %posting.account_id,
            requested_amount = signed_amount,
            "idempotency key reused with different parameters; returning stored entry"
        );
    } else {
        debug!(key = %posting.idempotency_key, "idempotent replay");
    }
    existing
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    #[tokio::test]
    async fn test_credit_validation() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        let result = credit(&db, bonus("alice", 0, "k-zero")).await;
        assert!(matches!(result, Err(Error::InvalidAmount { amount: 0 })));

        let result = credit(&db, bonus("alice", -10, "k-neg")).await;
        assert!(matches!(result, Err(Error::InvalidAmount { amount: -10 })));

        let result = credit(&db, bonus("alice", 10, "  ")).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_debit_validation() -> Result<()> {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        let result = debit(&db, payment("alice", 0, "k")).await;
        assert!(matches!(result, Err(Error::InvalidAmount { amount: 0 })));

        Ok(())
    }

    #[tokio::test]
    async fn test_credit_creates_account_and_balance() -> Result<()> {
        let db = setup_test_db().await?;

        let tx = credit(&db, bonus("alice", 250, "bonus-1")).await?;
        assert_eq!(tx.amount, 250);
        assert_eq!(tx.tx_type, TransactionType::Bonus);
        assert_eq!(tx.account_id, "alice");

        assert_eq!(get_balance(&db, "alice").await?, 250);
        assert_eq!(projected_balance(&db, "alice").await?, 250);
        assert!(find_account(&db, "alice").await?.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn test_credit_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;

        let first = credit(&db, bonus("alice", 100, "same-key")).await?;
        let second = credit(&db, bonus("alice", 100, "same-key")).await?;
        let third = credit(&db, bonus("alice", 999, "same-key")).await?;

        assert_eq!(first, second);
        assert_eq!(first, third);
        assert_eq!(get_balance(&db, "alice").await?, 100);
        assert_eq!(list_transactions(&db, "alice", PageRequest::first(10)).await?.total_items, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_credits_with_same_key_write_once() -> Result<()> {
        let db = setup_test_db().await?;

        let (a, b) = tokio::join!(
            credit(&db, bonus("alice", 100, "race-key")),
            credit(&db, bonus("alice", 100, "race-key")),
        );
        assert_eq!(a?, b?);
        assert_eq!(get_balance(&db, "alice").await?, 100);
        assert_eq!(projected_balance(&db, "alice").await?, 100);

        Ok(())
    }

    #[tokio::test]
    async fn test_debit_insufficient_balance_writes_nothing() -> Result<()> {
        let db = setup_test_db().await?;
        credit(&db, bonus("alice", 50, "seed")).await?;

        let result = debit(&db, payment("alice", 80, "pay-1")).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientBalance {
                balance: 50,
                required: 80,
                ..
            })
        ));

        assert_eq!(get_balance(&db, "alice").await?, 50);
        assert_eq!(projected_balance(&db, "alice").await?, 50);
        assert!(find_by_idempotency_key(&db, "pay-1").await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_debits_never_overdraw() -> Result<()> {
        let db = setup_test_db().await?;
        credit(&db, bonus("alice", 100, "seed")).await?;

        let (a, b) = tokio::join!(
            debit(&db, payment("alice", 70, "pay-a")),
            debit(&db, payment("alice", 70, "pay-b")),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(Error::InsufficientBalance { .. })))
                .count(),
            1
        );

        assert_eq!(get_balance(&db, "alice").await?, 30);
        assert_eq!(projected_balance(&db, "alice").await?, 30);

        Ok(())
    }

    #[tokio::test]
    async fn test_debit_on_unknown_account_is_insufficient() -> Result<()> {
        let db = setup_test_db().await?;

        let result = debit(&db, payment("nobody", 1, "pay-x")).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientBalance { balance: 0, .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_debit_stores_negative_entry() -> Result<()> {
        let db = setup_test_db().await?;
        credit(&db, bonus("alice", 300, "seed")).await?;

        let tx = debit(&db, payment("alice", 120, "pay-1")).await?;
        assert_eq!(tx.amount, -120);
        assert_eq!(tx.tx_type, TransactionType::BookingPayment);

        // Replay does not debit twice
        let replay = debit(&db, payment("alice", 120, "pay-1")).await?;
        assert_eq!(replay, tx);
        assert_eq!(get_balance(&db, "alice").await?, 180);

        // Spending the exact balance is allowed
        debit(&db, payment("alice", 180, "pay-2")).await?;
        assert_eq!(get_balance(&db, "alice").await?, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_balance_matches_ledger_sum_over_sequence() -> Result<()> {
        let db = setup_test_db().await?;
        let steps: [(i64, &str); 7] = [
            (100, "c1"),
            (-40, "d1"),
            (-70, "d2"), // rejected
            (25, "c2"),
            (-85, "d3"),
            (-1, "d4"), // rejected
            (10, "c3"),
        ];

        for (amount, key) in steps {
            let result = if amount > 0 {
                credit(&db, bonus("bob", amount, key)).await
            } else {
                debit(&db, payment("bob", -amount, key)).await
            };
            if let Err(err) = result {
                assert!(matches!(err, Error::InsufficientBalance { .. }));
            }

            let sum = get_balance(&db, "bob").await?;
            assert!(sum >= 0);
            assert_eq!(sum, projected_balance(&db, "bob").await?);
        }

        assert_eq!(get_balance(&db, "bob").await?, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_transactions_newest_first_and_paged() -> Result<()> {
        let db = setup_test_db().await?;
        for i in 1..=5 {
            credit(&db, bonus("carol", i * 10, &format!("k{i}"))).await?;
        }
        credit(&db, bonus("dave", 1, "other")).await?;

        let first = list_transactions(&db, "carol", PageRequest::new(0, 2, 50)).await?;
        assert_eq!(first.total_items, 5);
        assert_eq!(first.total_pages, 3);
        assert_eq!(
            first.items.iter().map(|t| t.amount).collect::<Vec<_>>(),
            vec![50, 40]
        );

        let last = list_transactions(&db, "carol", PageRequest::new(2, 2, 50)).await?;
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].amount, 10);
        assert!(!last.has_next());

        let beyond = list_transactions(&db, "carol", PageRequest::new(9, 2, 50)).await?;
        assert!(beyond.items.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_huge_page_numbers_return_empty_pages() -> Result<()> {
        let db = setup_test_db().await?;
        credit(&db, bonus("carol", 10, "k1")).await?;

        for request in [
            PageRequest::new(u64::MAX, 20, 100),
            PageRequest::new(1 << 63, 2, 100),
        ] {
            let page = list_transactions(&db, "carol", request).await?;
            assert!(page.items.is_empty());
            assert_eq!(page.total_items, 1);
            assert!(!page.has_next());
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_sum_for_type() -> Result<()> {
        let db = setup_test_db().await?;
        credit(&db, bonus("erin", 40, "b1")).await?;
        credit(
            &db,
            Posting::new("erin", 100, TransactionType::ReferralReward, "reward", "r1"),
        )
        .await?;
        credit(
            &db,
            Posting::new("frank", 100, TransactionType::ReferralReward, "reward", "r2"),
        )
        .await?;

        assert_eq!(
            sum_for_type(&db, "erin", TransactionType::ReferralReward).await?,
            100
        );
        assert_eq!(total_for_type(&db, TransactionType::ReferralReward).await?, 200);
        assert_eq!(total_for_type(&db, TransactionType::Refund).await?, 0);

        Ok(())
    }
}
