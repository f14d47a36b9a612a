//! `/user/*` wallet handlers.

use crate::{
    api::{AppState, Caller, ListQuery, cache::ADMIN_SCOPE, error::ApiError},
    core::{
        ledger::{self, Posting},
        pagination::{Page, PageRequest},
    },
    entities::{TransactionType, wallet_transaction},
};
use axum::{
    Json,
    extract::{Query, State},
    response::Response,
};
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Prefix for keys generated when an admin credit arrives without one.
pub const ADMIN_CREDIT_KEY_PREFIX: &str = "admin-credit:";

/// Balance and history of one wallet
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletView {
    /// Account owner
    pub account_id: String,
    /// Ledger sum
    pub balance: i64,
    /// Ledger entries, newest first
    pub transactions: Page<wallet_transaction::Model>,
}

/// Body of `POST /user/admin/add-wallet-money`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMoneyRequest {
    /// Account to credit
    pub user_id: String,
    /// Positive amount in minor units
    pub amount: i64,
    /// Shown in the user's history
    #[serde(default)]
    pub description: Option<String>,
    /// Supply to make retries safe; generated when absent
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// `GET /user/wallet`
pub async fn wallet(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let request = state.page_request(&query);
    let result = wallet_view(&*state.db, &caller.user_id, request).await;
    let key = query.cache_key("wallet", request);
    state.cache.serve(&caller.user_id, &key, result).await
}

/// `POST /user/admin/add-wallet-money`
pub async fn add_wallet_money(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<AddMoneyRequest>,
) -> Result<Json<wallet_transaction::Model>, ApiError> {
    caller.require_admin()?;

    let key = body
        .idempotency_key
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(|| format!("{ADMIN_CREDIT_KEY_PREFIX}{}", Uuid::new_v4()));
    let description = body
        .description
        .unwrap_or_else(|| format!("Credit from {}", caller.user_id));

    let posting = Posting::new(
        body.user_id.trim(),
        body.amount,
        TransactionType::AdminCredit,
        description,
        key,
    );
    let tx = ledger::credit(&*state.db, posting).await?;
    info!(
        admin = %caller.user_id,
        account = %tx.account_id,
        amount = tx.amount,
        "admin credit applied"
    );

    state
        .cache
        .invalidate(&[tx.account_id.as_str(), ADMIN_SCOPE])
        .await;
    Ok(Json(tx))
}

async fn wallet_view<C: ConnectionTrait>(
    db: &C,
    account_id: &str,
    request: PageRequest,
) -> crate::errors::Result<WalletView> {
    Ok(WalletView {
        account_id: account_id.to_string(),
        balance: ledger::get_balance(db, account_id).await?,
        transactions: ledger::list_transactions(db, account_id, request).await?,
    })
}
