//! Distributed cache contract and an in-process implementation.
//!
//! The cache backs two things: schema discovery results and idempotency
//! records. Its atomic set-if-absent is the only cross-request synchronizer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache as MokaCache;

use crate::error::AppResult;

/// Cache contract. Values are strings; callers serialize.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Store `value` only if `key` is absent. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool>;

    /// Read `key`. A miss is an empty string.
    async fn get(&self, key: &str) -> AppResult<String>;

    /// Store `value`, replacing any existing entry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> AppResult<()>;
}

/// Default capacity of the in-process cache.
const DEFAULT_MAX_ENTRIES: u64 = 10_000;

#[derive(Clone)]
struct CachedValue {
    value: String,
    ttl: Duration,
}

/// Each entry lives for the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, CachedValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache for single-replica deployments and tests.
#[derive(Clone)]
pub struct LocalCache {
    inner: MokaCache<String, CachedValue>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        let inner = MokaCache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { inner }
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for LocalCache {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let entry = self
            .inner
            .entry(key.to_string())
            .or_insert(CachedValue {
                value: value.to_string(),
                ttl,
            })
            .await;

        Ok(entry.is_fresh())
    }

    async fn get(&self, key: &str) -> AppResult<String> {
        Ok(self
            .inner
            .get(key)
            .await
            .map(|cached| cached.value)
            .unwrap_or_default())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        self.inner
            .insert(
                key.to_string(),
                CachedValue {
                    value: value.to_string(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }
}
