// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Unit completion.
//!
//! Completion is terminal, so it is never queued: it needs connectivity and
//! a remote that already holds every local edit of the unit.

use tracing::{info, warn};

use crate::record::{CompletionPayload, PendingCompletion};
use crate::remote::RemoteError;
use crate::resilience::retry::retry_when;

use super::{EngineError, InspectionEngine, SyncError};

impl InspectionEngine {
    /// Finalize a unit of work.
    ///
    /// # Errors
    ///
    /// - [`EngineError::OfflineCompletion`] when offline (nothing is queued)
    /// - [`EngineError::SyncIncomplete`] when the unit still has unsynced
    ///   edits or attachments after the pre-completion sync
    /// - [`EngineError::Remote`] when the remote refuses the completion
    #[tracing::instrument(skip(self, payload))]
    pub async fn complete_unit(
        &self,
        unit_id: &str,
        payload: CompletionPayload,
    ) -> Result<PendingCompletion, EngineError> {
        if !self.connectivity.is_online() {
            warn!(unit_id, "Completion refused while offline");
            return Err(EngineError::OfflineCompletion(unit_id.to_string()));
        }

        let report = match self.orchestrator.run().await {
            Ok(report) => report,
            Err(SyncError::Offline) => return Err(EngineError::OfflineCompletion(unit_id.to_string())),
            Err(e) => return Err(e.into()),
        };

        let unsynced_updates = self.queue.list_pending_for_unit(unit_id).await?.len();
        let unsynced_attachments = self
            .queue
            .list_all_unsynced_attachments()
            .await?
            .iter()
            .filter(|a| a.unit_id == unit_id)
            .count();

        if unsynced_updates > 0 || unsynced_attachments > 0 {
            // Trailing space: "unit a: " must not match "unit a:b: "
            let tag = format!("unit {}: ", unit_id);
            let mut reasons: Vec<String> = report
                .errors
                .iter()
                .filter(|e| e.starts_with(&tag))
                .cloned()
                .collect();
            if reasons.is_empty() {
                reasons.push(format!(
                    "unit {}: {} field update(s) and {} attachment(s) still pending",
                    unit_id, unsynced_updates, unsynced_attachments
                ));
            }
            warn!(unit_id, ?reasons, "Completion blocked by unsynced local work");
            return Err(EngineError::SyncIncomplete(reasons));
        }

        let completed_at = self.clock.now_millis();
        retry_when(
            "complete_unit",
            &self.config.remote_retry(),
            || self.remote.complete_unit(unit_id, &payload, completed_at),
            RemoteError::is_transient,
        )
        .await?;

        // The remote now holds a terminal state the snapshot does not show
        if let Err(e) = self.cache.evict(unit_id).await {
            warn!(unit_id, error = %e, "Cache invalidation after completion failed");
        }

        info!(unit_id, classification = %payload.classification, "Unit completed");
        Ok(PendingCompletion {
            unit_id: unit_id.to_string(),
            payload,
            completed_at,
            synced: true,
        })
    }
}
