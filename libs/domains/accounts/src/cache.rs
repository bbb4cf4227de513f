//! Cache-aside projections of account reads.
//!
//! The cache holds digest-stripped `AccountResponse` snapshots with a TTL.
//! It is never authoritative: the engine populates it on miss and tolerates
//! every cache failure by falling through to the store. Writes do not
//! invalidate; staleness is bounded by the TTL.

use crate::error::{AccountError, AccountResult};
use crate::models::AccountResponse;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Fixed key for the cached account list projection.
pub const ACCOUNT_LIST_KEY: &str = "accounts:all";

fn account_key(id: Uuid) -> String {
    format!("account:{}", id)
}

/// Side cache of read-mostly account projections.
#[async_trait]
pub trait ProjectionCache: Send + Sync {
    async fn get_account(&self, id: Uuid) -> AccountResult<Option<AccountResponse>>;

    async fn set_account(&self, id: Uuid, projection: &AccountResponse) -> AccountResult<()>;

    async fn get_account_list(&self, key: &str) -> AccountResult<Option<Vec<AccountResponse>>>;

    async fn set_account_list(&self, key: &str, list: &[AccountResponse]) -> AccountResult<()>;
}

/// Redis implementation of [`ProjectionCache`] with a fixed TTL.
pub struct RedisProjectionCache {
    redis: Arc<ConnectionManager>,
    ttl_seconds: u64,
}

impl RedisProjectionCache {
    pub fn new(redis: ConnectionManager, ttl_seconds: u64) -> Self {
        Self {
            redis: Arc::new(redis),
            ttl_seconds,
        }
    }

    /// TTL from `CACHE_TTL_SECONDS`, default 600.
    pub fn from_env(redis: ConnectionManager) -> Self {
        let ttl_seconds = std::env::var("CACHE_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(600);
        Self::new(redis, ttl_seconds)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> AccountResult<Option<T>> {
        let mut conn = (*self.redis).clone();

        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| AccountError::Dependency(format!("cache read failed: {}", e)))?;

        match raw {
            Some(json) => {
                let value = serde_json::from_str(&json)
                    .map_err(|e| AccountError::Dependency(format!("cache decode failed: {}", e)))?;
                debug!(key = %key, "Cache hit");
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> AccountResult<()> {
        let mut conn = (*self.redis).clone();

        let json = serde_json::to_string(value)
            .map_err(|e| AccountError::Dependency(format!("cache encode failed: {}", e)))?;

        let _: () = conn
            .set_ex(key, json, self.ttl_seconds)
            .await
            .map_err(|e| AccountError::Dependency(format!("cache write failed: {}", e)))?;

        debug!(key = %key, ttl_seconds = %self.ttl_seconds, "Cache populated");
        Ok(())
    }
}

#[async_trait]
impl ProjectionCache for RedisProjectionCache {
    async fn get_account(&self, id: Uuid) -> AccountResult<Option<AccountResponse>> {
        self.get_json(&account_key(id)).await
    }

    async fn set_account(&self, id: Uuid, projection: &AccountResponse) -> AccountResult<()> {
        self.set_json(&account_key(id), projection).await
    }

    async fn get_account_list(&self, key: &str) -> AccountResult<Option<Vec<AccountResponse>>> {
        self.get_json(key).await
    }

    async fn set_account_list(&self, key: &str, list: &[AccountResponse]) -> AccountResult<()> {
        self.set_json(key, &list).await
    }
}

/// In-memory implementation of [`ProjectionCache`] (for development and
/// testing), with Instant-based expiry.
pub struct InMemoryProjectionCache {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
    ttl: Duration,
}

impl InMemoryProjectionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> AccountResult<Option<T>> {
        let entries = self.entries.read().await;

        match entries.get(key) {
            Some((json, expires_at)) if *expires_at > Instant::now() => {
                let value = serde_json::from_str(json)
                    .map_err(|e| AccountError::Dependency(format!("cache decode failed: {}", e)))?;
                Ok(Some(value))
            }
            _ => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> AccountResult<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| AccountError::Dependency(format!("cache encode failed: {}", e)))?;

        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (json, Instant::now() + self.ttl));
        Ok(())
    }
}

#[async_trait]
impl ProjectionCache for InMemoryProjectionCache {
    async fn get_account(&self, id: Uuid) -> AccountResult<Option<AccountResponse>> {
        self.get_json(&account_key(id)).await
    }

    async fn set_account(&self, id: Uuid, projection: &AccountResponse) -> AccountResult<()> {
        self.set_json(&account_key(id), projection).await
    }

    async fn get_account_list(&self, key: &str) -> AccountResult<Option<Vec<AccountResponse>>> {
        self.get_json(key).await
    }

    async fn set_account_list(&self, key: &str, list: &[AccountResponse]) -> AccountResult<()> {
        self.set_json(key, &list).await
    }
}
