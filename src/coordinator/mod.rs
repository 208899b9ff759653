// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine coordinator.
//!
//! The [`InspectionEngine`] is the facade the UI layer talks to. It ties
//! together:
//! - the local store (lazily opened, in-memory or SQLite)
//! - the TTL cache of remote unit snapshots
//! - the pending write queue
//! - merge-on-read reconciliation
//! - the [`SyncOrchestrator`] and optional background wake-up
//!
//! # Data flow
//!
//! ```text
//! record_*  ──► PendingQueue ──► (online?) SyncOrchestrator ──► RemoteStore
//! read_unit ──► cache (fresh?) / RemoteStore ──► merged_view(+ pending)
//! complete_unit ──► (online only) sync ──► RemoteStore::complete_unit
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use inspection_sync::{EngineConfig, InspectionEngine, InMemoryRemote, ConnectivityMonitor};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = InspectionEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(InMemoryRemote::new()),
//!     Arc::new(ConnectivityMonitor::new(false)),
//! );
//!
//! // Offline: the edit is queued and immediately visible
//! engine.record_field_update("insp-1", "roof", json!("cracked tiles")).await.unwrap();
//! let view = engine.read_unit("insp-1").await.unwrap();
//! assert_eq!(view.fields["roof"], json!("cracked tiles"));
//! # }
//! ```

mod api;
mod background;
mod completion;
mod sync;
mod types;

pub use background::{BackgroundHost, BackgroundSyncRegistrar, ConnectivityWakeHost};
pub use sync::{SyncOrchestrator, DEFAULT_ATTACHMENT_PREFIX};
pub use types::{EngineError, SyncError, SyncPhase, SyncReport};

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::eviction::ExpiryManager;
use crate::pending::{PendingQueue, SyncMetadata};
use crate::remote::RemoteStore;
use crate::resilience::connectivity::Connectivity;
use crate::storage::StoreContext;

/// Offline-first inspection engine.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`; share it behind an `Arc`. Queue writes are
/// serialized internally and overlapping sync runs are refused.
pub struct InspectionEngine {
    pub(super) config: EngineConfig,

    /// Lazily opened local store shared by every component
    pub(super) ctx: Arc<StoreContext>,

    pub(super) clock: Arc<dyn Clock>,

    /// Cached remote snapshots with TTL
    pub(super) cache: Arc<ExpiryManager>,

    /// Unsynced field updates and attachments
    pub(super) queue: Arc<PendingQueue>,

    /// Last successful sync time and other scalars
    pub(super) metadata: Arc<SyncMetadata>,

    pub(super) remote: Arc<dyn RemoteStore>,

    pub(super) connectivity: Arc<dyn Connectivity>,

    pub(super) orchestrator: Arc<SyncOrchestrator>,

    /// Host facility for waking sync when connectivity returns
    pub(super) background_host: RwLock<Option<Arc<dyn BackgroundHost>>>,
}

impl InspectionEngine {
    /// Create an engine on the wall clock.
    ///
    /// The local store opens on first use; a bad `store_path` surfaces as a
    /// storage error from the first operation, not here.
    pub fn new(
        config: EngineConfig,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        let ctx = Arc::new(StoreContext::from_path(config.store_path.as_deref()));
        Self::with_parts(config, ctx, remote, connectivity, Arc::new(SystemClock))
    }

    /// Create an engine from explicit parts (custom store or clock).
    pub fn with_parts(
        config: EngineConfig,
        ctx: Arc<StoreContext>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn Connectivity>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = Arc::new(ExpiryManager::new(ctx.clone(), clock.clone(), config.cache_ttl()));
        let queue = Arc::new(PendingQueue::new(ctx.clone(), clock.clone()));
        let metadata = Arc::new(SyncMetadata::new(ctx.clone()));

        let orchestrator = Arc::new(
            SyncOrchestrator::new(
                queue.clone(),
                metadata.clone(),
                remote.clone(),
                connectivity.clone(),
                clock.clone(),
            )
            .with_cache(cache.clone())
            .with_retry(config.remote_retry())
            .with_attachment_prefix(config.attachment_path_prefix.clone())
            .with_purge_on_success(config.purge_synced_on_success),
        );

        Self {
            config,
            ctx,
            clock,
            cache,
            queue,
            metadata,
            remote,
            connectivity,
            orchestrator,
            background_host: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Whether the local store has been opened yet.
    #[must_use]
    pub fn is_store_open(&self) -> bool {
        self.ctx.is_open()
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Watch sync phases (for a progress indicator).
    #[must_use]
    pub fn sync_phase_receiver(&self) -> watch::Receiver<SyncPhase> {
        self.orchestrator.phase_receiver()
    }

    /// Install the host used by [`try_register_background`](Self::try_register_background).
    pub fn set_background_host(&self, host: Arc<dyn BackgroundHost>) {
        *self.background_host.write() = Some(host);
    }

    /// A host that syncs in-process on every offline→online transition.
    #[must_use]
    pub fn connectivity_wake_host(&self) -> Arc<ConnectivityWakeHost> {
        Arc::new(ConnectivityWakeHost::new(
            self.connectivity.clone(),
            self.orchestrator.clone(),
        ))
    }

    /// Ask the host to sync when connectivity returns. Never fails.
    pub fn try_register_background(&self) -> bool {
        let host = self.background_host.read().clone();
        BackgroundSyncRegistrar::new(host, self.config.background_sync_tag.clone()).try_register()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::remote::InMemoryRemote;
    use crate::resilience::connectivity::ConnectivityMonitor;
    use serde_json::json;

    #[tokio::test]
    async fn test_store_opens_lazily() {
        let engine = InspectionEngine::new(
            EngineConfig::default(),
            Arc::new(InMemoryRemote::new()),
            Arc::new(ConnectivityMonitor::new(false)),
        );
        assert!(!engine.is_store_open());

        engine.record_field_update("u1", "roof", json!(1)).await.unwrap();
        assert!(engine.is_store_open());
    }

    #[tokio::test]
    async fn test_background_registration_without_host_is_false() {
        let engine = InspectionEngine::with_parts(
            EngineConfig::default(),
            Arc::new(StoreContext::in_memory()),
            Arc::new(InMemoryRemote::new()),
            Arc::new(ConnectivityMonitor::new(true)),
            Arc::new(ManualClock::new(0)),
        );
        assert!(!engine.try_register_background());

        let host = engine.connectivity_wake_host();
        engine.set_background_host(host.clone());
        assert!(engine.try_register_background());
        assert!(host.is_armed());
        host.disarm();
    }
}
