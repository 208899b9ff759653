// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the engine coordinator.

use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::StorageError;

/// Sync orchestrator phase.
///
/// ```text
/// Idle → UploadingAttachments → SyncingFieldUpdates → Done
///                 └──────────────────────┴──────────→ FailedPartial
/// ```
///
/// Watch it via [`super::SyncOrchestrator::phase_receiver()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No run in progress
    Idle,
    /// Uploading staged binaries
    UploadingAttachments,
    /// Pushing merged field maps per unit
    SyncingFieldUpdates,
    /// Last run finished without errors
    Done,
    /// Last run recorded at least one error
    FailedPartial,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::UploadingAttachments => write!(f, "UploadingAttachments"),
            Self::SyncingFieldUpdates => write!(f, "SyncingFieldUpdates"),
            Self::Done => write!(f, "Done"),
            Self::FailedPartial => write!(f, "FailedPartial"),
        }
    }
}

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Attachments uploaded and marked in this run
    pub attachments_uploaded: usize,
    /// Field updates confirmed in this run
    pub updates_synced: usize,
    /// Units whose merged map was written
    pub units_synced: usize,
    /// One message per failed attachment or unit
    pub errors: Vec<String>,
    pub started_at: i64,
    pub finished_at: i64,
}

impl SyncReport {
    /// No errors recorded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Nothing was sent (e.g. the queue was empty).
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.attachments_uploaded == 0 && self.updates_synced == 0 && self.errors.is_empty()
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "uploaded={}, synced={}, units={}, errors={}",
            self.attachments_uploaded,
            self.updates_synced,
            self.units_synced,
            self.errors.len()
        )
    }
}

/// Why a sync run did no work at all.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Offline: sync requires connectivity")]
    Offline,
    #[error("A sync run is already in progress")]
    InProgress,
    #[error("Pending queue unreadable: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from user-initiated engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Cannot complete unit '{0}' while offline")]
    OfflineCompletion(String),
    #[error("Sync incomplete, unit not finalized: {}", .0.join("; "))]
    SyncIncomplete(Vec<String>),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_phase_display() {
        assert_eq!(format!("{}", SyncPhase::Idle), "Idle");
        assert_eq!(format!("{}", SyncPhase::FailedPartial), "FailedPartial");
    }

    #[test]
    fn test_report_flags() {
        let empty = SyncReport::default();
        assert!(empty.is_clean());
        assert!(empty.is_noop());

        let partial = SyncReport {
            attachments_uploaded: 1,
            errors: vec!["upload a2 failed".into()],
            ..Default::default()
        };
        assert!(!partial.is_clean());
        assert!(!partial.is_noop());
        assert_eq!(format!("{}", partial), "uploaded=1, synced=0, units=0, errors=1");
    }

    #[test]
    fn test_engine_error_messages() {
        let err = EngineError::SyncIncomplete(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Sync incomplete, unit not finalized: a; b");

        let err = EngineError::OfflineCompletion("insp-4".into());
        assert!(err.to_string().contains("insp-4"));
    }
}
