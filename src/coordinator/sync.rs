// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The sync orchestrator.
//!
//! One run drains the pending queue in two phases:
//!
//! 1. **Attachments.** Every staged binary is uploaded and its remote address
//!    recorded. A failure is noted and the remaining uploads continue.
//! 2. **Field updates.** Unsynced updates are grouped by unit. Each unit's
//!    current remote map is fetched, the pending values are overlaid (pending
//!    wins) and the merged map is written back in one call. Only the entries
//!    that were actually written are marked synced, so an edit made while the
//!    write was in flight stays pending for the next run.
//!
//! Failures are collected into the [`SyncReport`], never thrown. The only
//! hard errors are "offline", "a run is already in progress" and a queue
//! that cannot be read at all.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::types::{SyncError, SyncPhase, SyncReport};
use crate::clock::Clock;
use crate::eviction::ExpiryManager;
use crate::merge::{overlay, referenced_attachments, resolve_attachment_refs};
use crate::metrics::{self, PhaseTimer};
use crate::pending::{PendingQueue, SyncMetadata};
use crate::record::{AttachmentId, FieldMap, PendingAttachment, PendingFieldUpdate, RemoteAddress};
use crate::remote::{RemoteError, RemoteStore};
use crate::resilience::connectivity::Connectivity;
use crate::resilience::retry::{retry_when, RetryConfig};
use crate::storage::StorageError;

/// Default remote folder for uploaded binaries.
pub const DEFAULT_ATTACHMENT_PREFIX: &str = "inspection-photos";

pub struct SyncOrchestrator {
    queue: Arc<PendingQueue>,
    metadata: Arc<SyncMetadata>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<dyn Connectivity>,
    clock: Arc<dyn Clock>,
    /// Written back after a successful unit push (expiry untouched)
    cache: Option<Arc<ExpiryManager>>,
    retry: RetryConfig,
    attachment_prefix: String,
    purge_on_success: bool,
    running: AtomicBool,
    phase: watch::Sender<SyncPhase>,
}

impl SyncOrchestrator {
    pub fn new(
        queue: Arc<PendingQueue>,
        metadata: Arc<SyncMetadata>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            queue,
            metadata,
            remote,
            connectivity,
            clock,
            cache: None,
            retry: RetryConfig::query(),
            attachment_prefix: DEFAULT_ATTACHMENT_PREFIX.to_string(),
            purge_on_success: false,
            running: AtomicBool::new(false),
            phase,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ExpiryManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_attachment_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.attachment_prefix = prefix.into();
        self
    }

    /// Drop synced entries from the queue after a clean run.
    #[must_use]
    pub fn with_purge_on_success(mut self, purge: bool) -> Self {
        self.purge_on_success = purge;
        self
    }

    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Subscribe to phase transitions (for progress UI).
    #[must_use]
    pub fn phase_receiver(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Remote path for an attachment's binary.
    #[must_use]
    pub fn upload_path(&self, attachment: &PendingAttachment) -> String {
        format!(
            "{}/{}/{}/{}-{}",
            self.attachment_prefix,
            attachment.unit_id,
            attachment.field_id,
            attachment.id,
            sanitize_filename(&attachment.filename)
        )
    }

    /// Drain the pending queue to the remote.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("Sync skipped: another run in progress");
            metrics::record_sync_run("in_progress");
            return Err(SyncError::InProgress);
        }
        let _guard = RunGuard(&self.running);

        // Drop the previous run's terminal phase
        self.phase.send_replace(SyncPhase::Idle);

        if !self.connectivity.is_online() {
            debug!("Sync skipped: offline");
            metrics::record_sync_run("offline");
            return Err(SyncError::Offline);
        }

        let pending = match self.queue.pending_counts().await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %e, "Sync aborted: pending queue unreadable");
                self.phase.send_replace(SyncPhase::FailedPartial);
                metrics::record_sync_run("storage_error");
                return Err(SyncError::Storage(e));
            }
        };
        debug!(
            field_updates = pending.field_updates,
            attachments = pending.attachments,
            "Sync run starting"
        );

        let mut report = SyncReport {
            started_at: self.clock.now_millis(),
            ..Default::default()
        };

        self.phase.send_replace(SyncPhase::UploadingAttachments);
        {
            let _timer = PhaseTimer::new("attachments");
            match self.queue.read_unsynced_attachments().await {
                Ok(read) => {
                    report_malformed(&read.malformed, &mut report);
                    self.upload_attachments(read.entries, &mut report).await;
                }
                Err(e) => report.errors.push(format!("read pending attachments: {}", e)),
            }
        }

        self.phase.send_replace(SyncPhase::SyncingFieldUpdates);
        {
            let _timer = PhaseTimer::new("field_updates");
            match self.queue.read_unsynced().await {
                Ok(read) => {
                    report_malformed(&read.malformed, &mut report);
                    self.push_field_updates(read.entries, &mut report).await;
                }
                Err(e) => report.errors.push(format!("read pending field updates: {}", e)),
            }
        }

        report.finished_at = self.clock.now_millis();

        if report.is_clean() {
            if let Err(e) = self.metadata.set_last_sync(report.finished_at).await {
                report.errors.push(format!("record last sync time: {}", e));
            }
        }

        if report.is_clean() && self.purge_on_success {
            match self.queue.purge_synced().await {
                Ok(purged) if purged > 0 => debug!(purged, "Purged synced queue entries"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Purge after sync failed"),
            }
        }

        self.refresh_pending_gauges().await;

        if report.is_clean() {
            self.phase.send_replace(SyncPhase::Done);
            metrics::record_sync_run("clean");
            info!(%report, "Sync run finished");
        } else {
            self.phase.send_replace(SyncPhase::FailedPartial);
            metrics::record_sync_run("partial");
            warn!(%report, errors = ?report.errors, "Sync run finished with errors");
        }

        Ok(report)
    }

    async fn upload_attachments(&self, attachments: Vec<PendingAttachment>, report: &mut SyncReport) {
        let total = attachments.len();
        for (done, attachment) in attachments.into_iter().enumerate() {
            if !self.connectivity.is_online() {
                report.errors.push(format!(
                    "connectivity lost: {} attachment upload(s) not attempted",
                    total - done
                ));
                return;
            }

            match self.upload_one(&attachment).await {
                Ok(address) => {
                    debug!(id = %attachment.id, %address, "Attachment uploaded");
                    metrics::record_attachment_upload("success");
                    report.attachments_uploaded += 1;
                }
                Err(message) => {
                    warn!(id = %attachment.id, error = %message, "Attachment upload failed");
                    metrics::record_attachment_upload("error");
                    report.errors.push(message);
                }
            }
        }
    }

    async fn upload_one(&self, attachment: &PendingAttachment) -> Result<RemoteAddress, String> {
        let blob = match self.queue.attachment_blob(attachment).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return Err(format!("attachment {}: no staged bytes", attachment.id)),
            Err(e) => return Err(format!("attachment {}: {}", attachment.id, e)),
        };

        let path = self.upload_path(attachment);
        let address = retry_when(
            "upload_binary",
            &self.retry,
            || self.remote.upload_binary(&path, &blob),
            RemoteError::is_transient,
        )
        .await
        .map_err(|e| format!("attachment {}: upload failed: {}", attachment.id, e))?;

        self.queue
            .mark_attachment_uploaded(&attachment.id, address.clone())
            .await
            .map_err(|e| format!("attachment {}: uploaded but not recorded: {}", attachment.id, e))?;
        Ok(address)
    }

    async fn push_field_updates(&self, updates: Vec<PendingFieldUpdate>, report: &mut SyncReport) {
        let mut by_unit: BTreeMap<String, Vec<PendingFieldUpdate>> = BTreeMap::new();
        for update in updates {
            by_unit.entry(update.unit_id.clone()).or_default().push(update);
        }

        let total = by_unit.len();
        for (done, (unit_id, updates)) in by_unit.into_iter().enumerate() {
            if !self.connectivity.is_online() {
                report.errors.push(format!(
                    "connectivity lost: {} unit(s) not synced",
                    total - done
                ));
                return;
            }

            match self.sync_unit(&unit_id, &updates).await {
                Ok(synced) => {
                    metrics::record_unit_push("success", synced);
                    report.updates_synced += synced;
                    report.units_synced += 1;
                }
                Err(message) => {
                    warn!(unit_id = %unit_id, error = %message, "Unit sync failed");
                    metrics::record_unit_push("error", 0);
                    report.errors.push(message);
                }
            }
        }
    }

    /// Fetch, overlay, write, confirm. Returns how many entries were confirmed.
    async fn sync_unit(&self, unit_id: &str, updates: &[PendingFieldUpdate]) -> Result<usize, String> {
        let resolved = self.resolve_references(unit_id, updates).await?;

        let remote_fields = retry_when(
            "fetch_unit_fields",
            &self.retry,
            || self.remote.fetch_unit_fields(unit_id),
            RemoteError::is_transient,
        )
        .await
        .map_err(|e| format!("unit {}: fetch failed: {}", unit_id, e))?;

        let merged = overlay(&remote_fields, &resolved);

        retry_when(
            "write_unit_fields",
            &self.retry,
            || self.remote.write_unit_fields(unit_id, &merged),
            RemoteError::is_transient,
        )
        .await
        .map_err(|e| format!("unit {}: write failed: {}", unit_id, e))?;

        let receipts: Vec<_> = updates.iter().map(PendingFieldUpdate::receipt).collect();
        let confirmed = self
            .queue
            .mark_synced(&receipts)
            .await
            .map_err(|e| format!("unit {}: written but not confirmed locally: {}", unit_id, e))?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.replace_payload::<FieldMap>(unit_id, merged).await {
                warn!(unit_id, error = %e, "Cache write-back failed");
            }
        }

        debug!(unit_id, written = updates.len(), confirmed, "Unit synced");
        Ok(confirmed)
    }

    /// Swap attachment reference tokens for remote addresses.
    async fn resolve_references(
        &self,
        unit_id: &str,
        updates: &[PendingFieldUpdate],
    ) -> Result<Vec<PendingFieldUpdate>, String> {
        let mut addresses: HashMap<AttachmentId, RemoteAddress> = HashMap::new();
        for id in updates.iter().flat_map(|u| referenced_attachments(&u.payload)) {
            if addresses.contains_key(&id) {
                continue;
            }
            match self.queue.uploaded_address(&id).await {
                Ok(Some(address)) => {
                    addresses.insert(id, address);
                }
                Ok(None) => {
                    return Err(format!("unit {}: attachment {} not uploaded yet", unit_id, id));
                }
                Err(e) => return Err(format!("unit {}: attachment {}: {}", unit_id, id, e)),
            }
        }

        if addresses.is_empty() {
            return Ok(updates.to_vec());
        }

        let lookup = |id: &AttachmentId| addresses.get(id).cloned();
        updates
            .iter()
            .map(|u| {
                let payload = resolve_attachment_refs(&u.payload, &lookup)
                    .map_err(|id| format!("unit {}: attachment {} not uploaded yet", unit_id, id))?;
                Ok(PendingFieldUpdate { payload, ..u.clone() })
            })
            .collect()
    }

    async fn refresh_pending_gauges(&self) {
        // pending_counts publishes the gauges itself
        if let Err(e) = self.queue.pending_counts().await {
            debug!(error = %e, "Pending gauges not refreshed");
        }
    }
}

/// One report line per stored record that no longer decodes.
fn report_malformed(malformed: &[StorageError], report: &mut SyncReport) {
    for e in malformed {
        report.errors.push(format!("queue entry skipped: {}", e));
    }
}

/// Keep remote paths to a single safe segment.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
