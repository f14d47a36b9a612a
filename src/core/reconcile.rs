//! Reconciliation - Audits projections against the ledger and heals partial rewards.
//!
//! Two passes:
//! - balance audit: `wallet_accounts.balance` must equal the sum of the account's ledger
//!   rows. Drift is repaired by resetting the projection to the ledger sum; ledger rows
//!   are never touched.
//! - reward reconciliation: a `pending` referral that already has reward credits was
//!   partially applied. It is finished through the reward engine, whose idempotency keys
//!   guarantee no credit is written twice.

use crate::{
    core::{ledger, reward},
    entities::{
        ReferralRecord, ReferralStatus, TransactionType, WalletAccount, WalletTransaction,
        referral_record, wallet_account, wallet_transaction,
    },
    errors::Result,
};
use chrono::Utc;
use sea_orm::{TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{info, warn};

/// Ledger sum versus projection for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceAudit {
    /// Audited account
    pub account_id: String,
    /// Sum over the account's ledger rows
    pub ledger_sum: i64,
    /// Running total in `wallet_accounts`
    pub projected: i64,
}

impl BalanceAudit {
    /// `projected - ledger_sum`
    #[must_use]
    pub const fn drift(&self) -> i64 {
        self.projected - self.ledger_sum
    }

    /// True when the projection agrees with the ledger.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.drift() == 0
    }
}

/// Summary of an audit over every account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Accounts examined
    pub accounts_checked: usize,
    /// Accounts whose projection was repaired, with the values found before repair
    pub repaired: Vec<BalanceAudit>,
}

/// Summary of a reward reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardReconcileReport {
    /// Pending referrals examined
    pub examined: usize,
    /// Referral ids that were found partially applied and completed
    pub completed: Vec<i64>,
}

/// Compares one account's projection with its ledger sum.
pub async fn audit_account<C: ConnectionTrait>(db: &C, account_id: &str) -> Result<BalanceAudit> {
    Ok(BalanceAudit {
        account_id: account_id.to_string(),
        ledger_sum: ledger::get_balance(db, account_id).await?,
        projected: ledger::projected_balance(db, account_id).await?,
    })
}

/// Resets an account's projection to its ledger sum. Returns the audit taken before.
pub async fn heal_account<C>(db: &C, account_id: &str) -> Result<BalanceAudit>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let audit = audit_account(&txn, account_id).await?;

    if !audit.is_consistent() {
        WalletAccount::update_many()
            .col_expr(wallet_account::Column::Balance, Expr::value(audit.ledger_sum))
            .col_expr(wallet_account::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(wallet_account::Column::UserId.eq(account_id))
            .exec(&txn)
            .await?;
        warn!(
            account = %account_id,
            ledger_sum = audit.ledger_sum,
            projected = audit.projected,
            "wallet projection drifted from ledger, repaired"
        );
    }

    txn.commit().await?;
    Ok(audit)
}

/// Audits every account and repairs any drifted projection.
pub async fn audit_all_accounts<C>(db: &C) -> Result<AuditReport>
where
    C: ConnectionTrait + TransactionTrait,
{
    let accounts = WalletAccount::find().all(db).await?;
    let mut report = AuditReport {
        accounts_checked: accounts.len(),
        ..AuditReport::default()
    };

    for account in accounts {
        let audit = heal_account(db, &account.user_id).await?;
        if !audit.is_consistent() {
            report.repaired.push(audit);
        }
    }

    info!(
        checked = report.accounts_checked,
        repaired = report.repaired.len(),
        "balance audit finished"
    );
    Ok(report)
}

/// Finishes referrals whose reward credits were written but whose status was not updated.
pub async fn reconcile_pending_rewards<C>(db: &C) -> Result<RewardReconcileReport>
where
    C: ConnectionTrait + TransactionTrait,
{
    let pending = ReferralRecord::find()
        .filter(referral_record::Column::Status.eq(ReferralStatus::Pending))
        .all(db)
        .await?;
    let mut report = RewardReconcileReport {
        examined: pending.len(),
        ..RewardReconcileReport::default()
    };

    for referral in pending {
        let credits = WalletTransaction::find()
            .filter(wallet_transaction::Column::RelatedReferralId.eq(referral.id))
            .filter(wallet_transaction::Column::TxType.eq(TransactionType::ReferralReward))
            .count(db)
            .await?;
        if credits == 0 {
            continue;
        }

        warn!(
            referral = referral.id,
            credits,
            "pending referral has reward credits, completing it"
        );
        if reward::pay_out(db, &referral).await?.is_rewarded() {
            report.completed.push(referral.id);
        }
    }

    info!(
        examined = report.examined,
        completed = report.completed.len(),
        "reward reconciliation finished"
    );
    Ok(report)
}
