// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local writes, merged reads and queue maintenance.
//!
//! Writes land in the pending queue unconditionally and are then pushed
//! opportunistically. Reads are read-through: a fresh cached snapshot is
//! used as is, a miss goes to the remote when online, and pending edits are
//! always laid on top.

use serde_json::Value;
use tracing::{debug, warn};

use crate::merge::{merged_view, MergedUnit, Snapshot};
use crate::pending::PendingCounts;
use crate::record::{AttachmentId, FieldKey, FieldMap, PendingFieldUpdate};
use crate::remote::RemoteError;
use crate::resilience::retry::retry_when;

use super::{EngineError, InspectionEngine, SyncError, SyncReport};

impl InspectionEngine {
    // ═══════════════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a field value. Visible to the next read immediately; pushed
    /// now if online, otherwise on a later sync.
    #[tracing::instrument(skip(self, payload))]
    pub async fn record_field_update(
        &self,
        unit_id: &str,
        field_id: &str,
        payload: Value,
    ) -> Result<PendingFieldUpdate, EngineError> {
        let update = self.queue.enqueue_field_update(unit_id, field_id, payload).await?;
        self.sync_opportunistically().await;
        Ok(update)
    }

    /// Stage a binary (e.g. a photo). Store `id.reference()` in a field
    /// payload to link it; the token becomes the remote address on sync.
    #[tracing::instrument(skip(self, blob), fields(size = blob.len()))]
    pub async fn record_attachment(
        &self,
        unit_id: &str,
        field_id: &str,
        blob: Vec<u8>,
        filename: &str,
    ) -> Result<AttachmentId, EngineError> {
        let id = self.queue.enqueue_attachment(unit_id, field_id, blob, filename).await?;
        self.sync_opportunistically().await;
        Ok(id)
    }

    /// Drop an unsynced field edit.
    pub async fn discard_field_update(&self, unit_id: &str, field_id: &str) -> Result<(), EngineError> {
        self.queue.discard_field_update(&FieldKey::new(unit_id, field_id)).await?;
        Ok(())
    }

    /// Drop a staged attachment and its bytes.
    pub async fn discard_attachment(&self, id: &AttachmentId) -> Result<(), EngineError> {
        self.queue.discard_attachment(id).await?;
        Ok(())
    }

    async fn sync_opportunistically(&self) {
        if !self.config.opportunistic_sync || !self.connectivity.is_online() {
            return;
        }

        match self.orchestrator.run().await {
            Ok(report) if report.is_clean() => debug!(%report, "Opportunistic sync finished"),
            Ok(report) => warn!(
                %report,
                errors = ?report.errors,
                "Opportunistic sync incomplete, entries stay queued"
            ),
            Err(SyncError::InProgress) => debug!("Opportunistic sync skipped, run in progress"),
            Err(e) => warn!(error = %e, "Opportunistic sync failed, entries stay queued"),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════════

    /// The unit as the inspector should see it: snapshot plus pending edits.
    ///
    /// Never fails for network reasons. Without a fresh snapshot and without
    /// connectivity the view holds only the pending edits.
    #[tracing::instrument(skip(self))]
    pub async fn read_unit(&self, unit_id: &str) -> Result<MergedUnit, EngineError> {
        let pending = self.queue.list_pending_for_unit(unit_id).await?;
        let snapshot = self.snapshot_for(unit_id).await;
        Ok(merged_view(unit_id, snapshot.as_ref(), &pending))
    }

    /// Like [`read_unit`](Self::read_unit) but always fetches the remote
    /// when online. Remote failures are returned, not hidden.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_unit(&self, unit_id: &str) -> Result<MergedUnit, EngineError> {
        if !self.connectivity.is_online() {
            return self.read_unit(unit_id).await;
        }

        let fields = self.fetch_and_cache(unit_id).await?;
        let pending = self.queue.list_pending_for_unit(unit_id).await?;
        Ok(merged_view(unit_id, Some(&Snapshot::remote(fields)), &pending))
    }

    /// Drop the cached snapshot of a unit.
    pub async fn invalidate_unit(&self, unit_id: &str) -> Result<(), EngineError> {
        self.cache.evict(unit_id).await?;
        Ok(())
    }

    async fn snapshot_for(&self, unit_id: &str) -> Option<Snapshot> {
        match self.cache.get_if_fresh::<FieldMap>(unit_id).await {
            Ok(Some(record)) => return Some(Snapshot::cached(record.payload, record.cached_at)),
            Ok(None) => {}
            // Local storage trouble on the read path degrades to a miss
            Err(e) => warn!(unit_id, error = %e, "Cache read failed, treating as miss"),
        }

        if !self.connectivity.is_online() {
            return None;
        }

        match self.fetch_and_cache(unit_id).await {
            Ok(fields) => Some(Snapshot::remote(fields)),
            Err(e) => {
                warn!(unit_id, error = %e, "Remote fetch failed, showing local state only");
                None
            }
        }
    }

    async fn fetch_and_cache(&self, unit_id: &str) -> Result<FieldMap, RemoteError> {
        let fields = retry_when(
            "fetch_unit_fields",
            &self.config.remote_retry(),
            || self.remote.fetch_unit_fields(unit_id),
            RemoteError::is_transient,
        )
        .await?;

        if let Err(e) = self.cache.put(unit_id, &fields).await {
            warn!(unit_id, error = %e, "Caching fetched snapshot failed");
        }
        Ok(fields)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Sync & maintenance
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run a sync now. Offline and overlapping runs are reported as errors;
    /// per-item failures are in the report.
    pub async fn sync_now(&self) -> Result<SyncReport, EngineError> {
        Ok(self.orchestrator.run().await?)
    }

    /// Delete every expired cached snapshot.
    pub async fn sweep_expired(&self) -> Result<usize, EngineError> {
        Ok(self.cache.sweep_expired().await?)
    }

    /// Drop synced queue entries that are no longer needed.
    pub async fn purge_synced(&self) -> Result<usize, EngineError> {
        Ok(self.queue.purge_synced().await?)
    }

    /// Unsynced counts (for a badge).
    pub async fn pending_counts(&self) -> Result<PendingCounts, EngineError> {
        Ok(self.queue.pending_counts().await?)
    }

    /// Time of the last sync that finished without errors.
    pub async fn last_sync(&self) -> Result<Option<i64>, EngineError> {
        Ok(self.metadata.last_sync().await?)
    }
}
