//! At-most-once coordination of create requests through the cache.
//!
//! A request's fingerprint is the client-supplied idempotency key, or the
//! SHA-256 of its canonical JSON body. The first request to claim the
//! fingerprint stores a `processing` marker; once it completes, the marker
//! is replaced by the resulting record so later duplicates replay it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::IDEMPOTENCY_KEY_PREFIX;
use crate::context::RequestContext;
use crate::error::{AppResult, BusinessError};
use crate::services::cache::Cache;
use crate::services::tenant::scoped_key;

/// Marker stored while the first request is in flight.
pub const PROCESSING_MARKER: &str = "processing";

/// Outcome of claiming a fingerprint.
#[derive(Debug)]
pub enum Acquisition<T> {
    /// This request owns the key and must run.
    Acquired(String),
    /// A previous request completed; its result is returned as-is.
    Replay(T),
}

/// Hex SHA-256 of the canonical JSON encoding of `body`.
pub fn body_fingerprint<B: Serialize>(body: &B) -> AppResult<String> {
    let canonical = serde_json::to_vec(body)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Cache key for a request: `[tenant:<id>:]idempotency:<fingerprint>`.
pub fn idempotency_key<B: Serialize>(ctx: &RequestContext, body: &B) -> AppResult<String> {
    let fingerprint = match ctx.idempotency_key() {
        Some(client_key) => client_key.to_string(),
        None => body_fingerprint(body)?,
    };

    Ok(scoped_key(
        ctx,
        &format!("{}:{}", IDEMPOTENCY_KEY_PREFIX, fingerprint),
    ))
}

#[derive(Clone)]
pub struct IdempotencyCoordinator {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl IdempotencyCoordinator {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Claim the fingerprint of `body`, or replay the stored result.
    ///
    /// Cache failures refuse the request; there is no non-idempotent fallback.
    pub async fn acquire<B, T>(&self, ctx: &RequestContext, body: &B) -> AppResult<Acquisition<T>>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let key = idempotency_key(ctx, body)?;

        if self
            .cache
            .set_if_absent(&key, PROCESSING_MARKER, self.ttl)
            .await?
        {
            debug!("Acquired idempotency key {}", key);
            return Ok(Acquisition::Acquired(key));
        }

        let current = self.cache.get(&key).await?;
        if current.is_empty() || current == PROCESSING_MARKER {
            return Err(BusinessError::DuplicateRequestInFlight.into());
        }

        let cached = serde_json::from_str(&current)?;
        info!("Replaying stored result for idempotency key {}", key);

        Ok(Acquisition::Replay(cached))
    }

    /// Store the completed result under `key`. Failures are only logged.
    pub async fn publish<T: Serialize>(&self, key: &str, result: &T) {
        let payload = match serde_json::to_string(result) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode idempotent result for {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = self.cache.set(key, &payload, self.ttl).await {
            warn!("Failed to store idempotent result for {}: {}", key, e);
        }
    }

    /// Drop the in-flight marker so a corrected retry can run. Failures are only logged.
    pub async fn release(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            warn!("Failed to release idempotency key {}: {}", key, e);
        }
    }
}
