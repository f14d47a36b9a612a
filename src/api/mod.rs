//! HTTP API - axum router over the core operations.
//!
//! Caller identity is asserted by the upstream gateway through the `x-user-id` and
//! `x-user-role` headers; this service does not authenticate. Handlers are thin: they
//! extract the caller, call one or two core functions and serialize the result.

pub mod cache;
pub mod error;
pub mod routes;

use crate::{
    config::Settings,
    core::pagination::PageRequest,
    entities::ReferralStatus,
    errors::Error,
};
use axum::{
    Router,
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, post},
};
use cache::ReadCache;
use error::ApiError;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the caller's role.
pub const USER_ROLE_HEADER: &str = "x-user-role";
/// Role value granting access to admin endpoints.
pub const ADMIN_ROLE: &str = "admin";

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    /// Database pool
    pub db: Arc<DatabaseConnection>,
    /// Loaded settings
    pub settings: Arc<Settings>,
    /// Last-known read cache
    pub cache: ReadCache,
}

impl AppState {
    /// Wraps a connection and settings with an empty cache.
    #[must_use]
    pub fn new(db: DatabaseConnection, settings: Settings) -> Self {
        let cache = ReadCache::from_settings(&settings.api);
        Self {
            db: Arc::new(db),
            settings: Arc::new(settings),
            cache,
        }
    }

    /// Turns paging query parameters into a clamped request.
    #[must_use]
    pub fn page_request(&self, query: &ListQuery) -> PageRequest {
        let api = &self.settings.api;
        PageRequest::new(
            query.page.unwrap_or(0),
            query.per_page.unwrap_or(api.default_per_page),
            api.max_per_page,
        )
    }
}

/// Identity of the calling user, taken from gateway headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// User id
    pub user_id: String,
    /// Whether the caller has the admin role
    pub is_admin: bool,
}

impl Caller {
    /// Fails with [`Error::Forbidden`] unless the caller is an admin.
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin {
            return Ok(());
        }
        Err(Error::Forbidden {
            message: format!("user {} is not an administrator", self.user_id),
        }
        .into())
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_value(parts, USER_ID_HEADER).ok_or(ApiError::Unauthenticated)?;
        let is_admin = header_value(parts, USER_ROLE_HEADER)
            .is_some_and(|role| role.eq_ignore_ascii_case(ADMIN_ROLE));

        Ok(Self {
            user_id: user_id.to_string(),
            is_admin,
        })
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Paging and filter query parameters shared by list endpoints
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Zero-based page index
    pub page: Option<u64>,
    /// Page size
    pub per_page: Option<u64>,
    /// Only records in this status
    pub status: Option<ReferralStatus>,
}

impl ListQuery {
    /// Cache key fragment identifying this query.
    #[must_use]
    pub fn cache_key(&self, prefix: &str, request: PageRequest) -> String {
        let status = self.status.map_or("any", ReferralStatus::as_str);
        format!("{prefix}:{}:{}:{status}", request.page, request.per_page)
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/referrals/stats", get(routes::referrals::stats))
        .route("/referrals/link", get(routes::referrals::link))
        .route("/referrals/invitees", get(routes::referrals::invitees))
        .route("/referrals/admin/all", get(routes::referrals::admin_all))
        .route("/referrals/admin/:id/cancel", post(routes::referrals::cancel))
        .route("/user/wallet", get(routes::wallet::wallet))
        .route("/user/admin/add-wallet-money", post(routes::wallet::add_wallet_money))
        .route("/internal/booking-events", post(routes::internal::booking_events))
        .route("/internal/signups", post(routes::internal::signups))
        .route("/health", get(routes::internal::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API until Ctrl-C.
pub async fn serve(listener: TcpListener, state: AppState) -> crate::errors::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP API listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
