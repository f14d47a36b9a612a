//! Last-known response cache for read endpoints.
//!
//! Successful reads refresh the cache; when the store is unavailable a read endpoint
//! answers with the last value it served instead of failing the page. Entries are grouped
//! by owner (a user id, or [`ADMIN_SCOPE`]) so write paths can drop everything a change
//! may have affected. The cache never answers while storage is healthy.
//!
//! Memory is bounded: at most `max_owners` owners are kept, each with at most
//! `entries_per_owner` views, and every entry expires after `ttl`.

use crate::{
    config::settings::ApiSettings,
    errors::{ErrorKind, Result},
};
use axum::{
    Json,
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use moka::future::Cache;
use serde::Serialize;
use serde_json::Value;
use std::{fmt, time::Duration};
use tracing::{debug, warn};

/// Owner key for admin-wide views.
pub const ADMIN_SCOPE: &str = "admin";

/// Header set on responses served from the cache.
pub const STALE_HEADER: HeaderName = HeaderName::from_static("x-served-from-cache");

type OwnerEntries = Cache<String, Value>;

/// Shared last-known cache
#[derive(Clone)]
pub struct ReadCache {
    owners: Cache<String, OwnerEntries>,
    entries_per_owner: u64,
    ttl: Duration,
}

impl fmt::Debug for ReadCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadCache")
            .field("owners", &self.owners.entry_count())
            .field("entries_per_owner", &self.entries_per_owner)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ReadCache {
    /// Creates a cache with explicit bounds.
    #[must_use]
    pub fn new(max_owners: u64, entries_per_owner: u64, ttl: Duration) -> Self {
        Self {
            owners: Cache::builder()
                .max_capacity(max_owners)
                .time_to_idle(ttl)
                .build(),
            entries_per_owner,
            ttl,
        }
    }

    /// Creates a cache sized by the API settings.
    #[must_use]
    pub fn from_settings(settings: &ApiSettings) -> Self {
        Self::new(
            settings.cache_max_owners,
            settings.cache_entries_per_owner,
            Duration::from_secs(settings.cache_ttl_secs),
        )
    }

    /// Serves the result of a read, falling back to the last-known value on storage errors.
    pub async fn serve<T: Serialize>(
        &self,
        owner: &str,
        key: &str,
        result: Result<T>,
    ) -> std::result::Result<Response, crate::api::error::ApiError> {
        match result {
            Ok(value) => {
                let value = serde_json::to_value(&value).map_err(crate::errors::Error::from)?;
                self.store(owner, key, value.clone()).await;
                Ok(Json(value).into_response())
            }
            Err(err) if err.kind() == ErrorKind::Storage => {
                if let Some(cached) = self.load(owner, key).await {
                    warn!(
                        owner,
                        key,
                        error = %err,
                        "storage unavailable, serving last-known value"
                    );
                    let mut response = Json(cached).into_response();
                    response
                        .headers_mut()
                        .insert(STALE_HEADER, HeaderValue::from_static("true"));
                    return Ok(response);
                }
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Stores a value under `(owner, key)`.
    pub async fn store(&self, owner: &str, key: &str, value: Value) {
        let capacity = self.entries_per_owner;
        let ttl = self.ttl;
        let entries = self
            .owners
            .get_with(owner.to_string(), async move {
                Cache::builder()
                    .max_capacity(capacity)
                    .time_to_live(ttl)
                    .build()
            })
            .await;
        entries.insert(key.to_string(), value).await;
    }

    /// Returns the value stored under `(owner, key)`.
    pub async fn load(&self, owner: &str, key: &str) -> Option<Value> {
        let entries = self.owners.get(owner).await?;
        entries.get(key).await
    }

    /// Drops every entry belonging to the given owners.
    pub async fn invalidate(&self, owners: &[&str]) {
        for owner in owners {
            if self.owners.remove(*owner).await.is_some() {
                debug!(owner, "read cache invalidated");
            }
        }
    }

    /// Applies pending evictions so entry counts are exact.
    pub async fn run_pending_tasks(&self) {
        self.owners.run_pending_tasks().await;
        let owners: Vec<OwnerEntries> = self.owners.iter().map(|(_, entries)| entries).collect();
        for entries in owners {
            entries.run_pending_tasks().await;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::errors::Error;
    use axum::http::StatusCode;
    use sea_orm::DbErr;
    use serde_json::json;

    fn small_cache() -> ReadCache {
        ReadCache::new(100, 8, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_store_load_invalidate() {
        let cache = small_cache();
        cache.store("alice", "stats", json!({"a": 1})).await;
        cache.store(ADMIN_SCOPE, "all", json!({"b": 2})).await;

        assert_eq!(cache.load("alice", "stats").await, Some(json!({"a": 1})));
        assert_eq!(cache.load("alice", "missing").await, None);

        cache.invalidate(&["alice"]).await;
        assert_eq!(cache.load("alice", "stats").await, None);
        assert!(cache.load(ADMIN_SCOPE, "all").await.is_some());
    }

    #[tokio::test]
    async fn test_serve_falls_back_only_on_storage_errors() {
        let cache = small_cache();
        let ok = cache.serve("alice", "stats", Ok(json!({"n": 1}))).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert!(ok.headers().get(STALE_HEADER).is_none());

        let storage: Result<Value> = Err(Error::from(DbErr::Custom("down".to_string())));
        let stale = cache.serve("alice", "stats", storage).await.unwrap();
        assert_eq!(stale.status(), StatusCode::OK);
        assert!(stale.headers().get(STALE_HEADER).is_some());

        let validation: Result<Value> = Err(Error::Validation {
            message: "bad".to_string(),
        });
        assert!(cache.serve("alice", "stats", validation).await.is_err());

        let uncached: Result<Value> = Err(Error::from(DbErr::Custom("down".to_string())));
        assert!(cache.serve("bob", "stats", uncached).await.is_err());
    }

    #[tokio::test]
    async fn test_entries_per_owner_are_bounded() {
        let cache = ReadCache::new(100, 2, Duration::from_secs(60));
        for page in 0..50 {
            cache
                .store("alice", &format!("wallet:{page}:20:any"), json!(page))
                .await;
        }
        cache.run_pending_tasks().await;

        let mut kept = 0;
        for page in 0..50 {
            if cache.load("alice", &format!("wallet:{page}:20:any")).await.is_some() {
                kept += 1;
            }
        }
        assert!(kept <= 2, "kept {kept} entries");
    }

    #[tokio::test]
    async fn test_owner_count_is_bounded() {
        let cache = ReadCache::new(3, 8, Duration::from_secs(60));
        for user in 0..50 {
            cache.store(&format!("user-{user}"), "stats", json!(user)).await;
        }
        cache.run_pending_tasks().await;

        let mut kept = 0;
        for user in 0..50 {
            if cache.load(&format!("user-{user}"), "stats").await.is_some() {
                kept += 1;
            }
        }
        assert!(kept <= 3, "kept {kept} owners");
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = ReadCache::new(100, 8, Duration::from_millis(50));
        cache.store("alice", "stats", json!(1)).await;
        assert!(cache.load("alice", "stats").await.is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.load("alice", "stats").await, None);
    }
}
