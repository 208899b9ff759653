// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Time-to-live enforcement for cached unit snapshots.
//!
//! Freshness is decided by a pure check ([`CachedRecord::is_fresh`]) and
//! eviction is a separate delete ([`ExpiryManager::evict`]).
//! [`ExpiryManager::get_if_fresh`] composes the two for the hot read path;
//! [`ExpiryManager::sweep_expired`] catches records nobody reads again.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::record::CachedRecord;
use crate::storage::{Collection, StorageError, StoreContext, StoredRecord};

pub struct ExpiryManager {
    ctx: Arc<StoreContext>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ExpiryManager {
    pub fn new(ctx: Arc<StoreContext>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { ctx, clock, ttl }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache `payload` for `unit_id`, stamped now with the configured TTL.
    pub async fn put<T: Serialize>(&self, unit_id: &str, payload: T) -> Result<CachedRecord<T>, StorageError> {
        let record = CachedRecord::new(
            unit_id.to_string(),
            payload,
            self.clock.now_millis(),
            self.ttl.as_millis() as i64,
        );
        let value = serde_json::to_value(&record).map_err(|e| StorageError::Malformed {
            collection: Collection::CachedUnits,
            key: unit_id.to_string(),
            reason: e.to_string(),
        })?;

        let store = self.ctx.handle().await?;
        store.put(Collection::CachedUnits, StoredRecord::new(unit_id, value)).await?;
        debug!(unit_id, expires_at = record.expires_at, "Cached unit snapshot");
        Ok(record)
    }

    /// Raw read, no freshness decision.
    ///
    /// A body that no longer decodes is evicted and reported as absent.
    pub async fn get<T: DeserializeOwned>(&self, unit_id: &str) -> Result<Option<CachedRecord<T>>, StorageError> {
        let store = self.ctx.handle().await?;
        let Some(stored) = store.get(Collection::CachedUnits, unit_id).await? else {
            return Ok(None);
        };

        match serde_json::from_value::<CachedRecord<T>>(stored.value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(unit_id, error = %e, "Undecodable cache record, evicting");
                store.delete(Collection::CachedUnits, unit_id).await?;
                Ok(None)
            }
        }
    }

    /// Swap the payload of an existing fresh record, keeping its timestamps.
    ///
    /// Returns false (and writes nothing) when no fresh record exists, so a
    /// write-back never extends a snapshot's lifetime or creates one.
    pub async fn replace_payload<T>(&self, unit_id: &str, payload: T) -> Result<bool, StorageError>
    where
        T: Serialize + DeserializeOwned,
    {
        let Some(existing) = self.get::<T>(unit_id).await? else {
            return Ok(false);
        };
        if !existing.is_fresh(self.clock.now_millis()) {
            return Ok(false);
        }

        let record = CachedRecord { payload, ..existing };
        let value = serde_json::to_value(&record).map_err(|e| StorageError::Malformed {
            collection: Collection::CachedUnits,
            key: unit_id.to_string(),
            reason: e.to_string(),
        })?;
        let store = self.ctx.handle().await?;
        store.put(Collection::CachedUnits, StoredRecord::new(unit_id, value)).await?;
        Ok(true)
    }

    /// Explicit deletion; also used for invalidation.
    pub async fn evict(&self, unit_id: &str) -> Result<(), StorageError> {
        let store = self.ctx.handle().await?;
        store.delete(Collection::CachedUnits, unit_id).await
    }

    /// Fresh payload or absent; a stale record is evicted on the way out.
    pub async fn get_if_fresh<T: DeserializeOwned>(&self, unit_id: &str) -> Result<Option<CachedRecord<T>>, StorageError> {
        let Some(record) = self.get::<T>(unit_id).await? else {
            crate::metrics::record_cache_lookup("miss");
            return Ok(None);
        };

        if record.is_fresh(self.clock.now_millis()) {
            crate::metrics::record_cache_lookup("hit");
            return Ok(Some(record));
        }

        debug!(unit_id, expires_at = record.expires_at, "Cached snapshot expired, evicting");
        self.evict(unit_id).await?;
        crate::metrics::record_cache_lookup("expired");
        crate::metrics::record_evictions(1);
        Ok(None)
    }

    /// Delete every expired cache record. Returns how many were removed.
    pub async fn sweep_expired(&self) -> Result<usize, StorageError> {
        let store = self.ctx.handle().await?;
        let now = self.clock.now_millis();
        let mut evicted = 0;

        for stored in store.scan(Collection::CachedUnits).await? {
            // Records without a readable expiry are dead weight too
            let expired = stored
                .value
                .get("expires_at")
                .and_then(|v| v.as_i64())
                .map_or(true, |expires_at| now >= expires_at);

            if expired {
                store.delete(Collection::CachedUnits, &stored.key).await?;
                evicted += 1;
            }
        }

        if evicted > 0 {
            info!(evicted, "Expired cache records swept");
            crate::metrics::record_evictions(evicted);
        }
        Ok(evicted)
    }
}
