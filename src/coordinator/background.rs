// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background sync registration.
//!
//! Some hosts can wake the engine when connectivity returns even if the user
//! has left the inspection screen. Registration is best effort: a host that
//! lacks the capability (or refuses) just means sync happens on the next
//! foreground trigger instead.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::sync::SyncOrchestrator;
use super::types::SyncError;
use crate::resilience::connectivity::Connectivity;

/// A platform facility that can schedule a sync when connectivity returns.
pub trait BackgroundHost: Send + Sync {
    fn supports_background_sync(&self) -> bool;

    /// Ask the host to fire `tag` once the device is back online.
    fn register(&self, tag: &str) -> Result<(), String>;
}

/// Requests background sync from an optional host.
pub struct BackgroundSyncRegistrar {
    host: Option<Arc<dyn BackgroundHost>>,
    tag: String,
}

impl BackgroundSyncRegistrar {
    pub fn new(host: Option<Arc<dyn BackgroundHost>>, tag: impl Into<String>) -> Self {
        Self { host, tag: tag.into() }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns whether the host accepted the registration. Never fails.
    pub fn try_register(&self) -> bool {
        let registered = match &self.host {
            None => {
                debug!("No background host; sync stays foreground-only");
                false
            }
            Some(host) if !host.supports_background_sync() => {
                debug!("Background sync unsupported by host");
                false
            }
            Some(host) => match host.register(&self.tag) {
                Ok(()) => {
                    info!(tag = %self.tag, "Background sync registered");
                    true
                }
                Err(e) => {
                    warn!(tag = %self.tag, error = %e, "Background sync registration refused");
                    false
                }
            },
        };
        crate::metrics::record_background_registration(registered);
        registered
    }
}

/// In-process background host: runs the orchestrator whenever connectivity
/// flips from offline to online.
///
/// Needs a [`Connectivity`] that publishes changes via `subscribe()`;
/// otherwise it reports no support.
pub struct ConnectivityWakeHost {
    connectivity: Arc<dyn Connectivity>,
    orchestrator: Arc<SyncOrchestrator>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityWakeHost {
    pub fn new(connectivity: Arc<dyn Connectivity>, orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            connectivity,
            orchestrator,
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Whether the wake task is active.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop listening for connectivity changes.
    pub fn disarm(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl BackgroundHost for ConnectivityWakeHost {
    fn supports_background_sync(&self) -> bool {
        self.connectivity.subscribe().is_some() && tokio::runtime::Handle::try_current().is_ok()
    }

    fn register(&self, tag: &str) -> Result<(), String> {
        let mut slot = self.task.lock();
        if slot.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        let mut rx = self
            .connectivity
            .subscribe()
            .ok_or_else(|| "connectivity changes are not observable".to_string())?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| e.to_string())?;
        let orchestrator = Arc::clone(&self.orchestrator);
        let tag = tag.to_string();

        *slot = Some(runtime.spawn(async move {
            let mut was_online = *rx.borrow_and_update();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online && !was_online {
                    match orchestrator.run().await {
                        Ok(report) => debug!(tag = %tag, %report, "Background sync finished"),
                        Err(SyncError::InProgress) => debug!(tag = %tag, "Background sync skipped, run in progress"),
                        Err(e) => debug!(tag = %tag, error = %e, "Background sync did not run"),
                    }
                }
                was_online = online;
            }
        }));
        Ok(())
    }
}

impl Drop for ConnectivityWakeHost {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::pending::{PendingQueue, SyncMetadata};
    use crate::remote::InMemoryRemote;
    use crate::resilience::connectivity::ConnectivityMonitor;
    use crate::resilience::retry::RetryConfig;
    use crate::storage::StoreContext;
    use serde_json::json;
    use std::time::Duration;

    struct FixedHost {
        supported: bool,
        accept: bool,
    }

    impl BackgroundHost for FixedHost {
        fn supports_background_sync(&self) -> bool {
            self.supported
        }

        fn register(&self, _tag: &str) -> Result<(), String> {
            if self.accept {
                Ok(())
            } else {
                Err("quota exceeded".into())
            }
        }
    }

    #[test]
    fn test_try_register_without_host() {
        let registrar = BackgroundSyncRegistrar::new(None, "inspection-sync");
        assert!(!registrar.try_register());
    }

    #[test]
    fn test_try_register_unsupported_and_refused() {
        let unsupported = BackgroundSyncRegistrar::new(
            Some(Arc::new(FixedHost { supported: false, accept: true })),
            "t",
        );
        assert!(!unsupported.try_register());

        let refused = BackgroundSyncRegistrar::new(
            Some(Arc::new(FixedHost { supported: true, accept: false })),
            "t",
        );
        assert!(!refused.try_register());

        let ok = BackgroundSyncRegistrar::new(
            Some(Arc::new(FixedHost { supported: true, accept: true })),
            "t",
        );
        assert!(ok.try_register());
    }

    #[tokio::test]
    async fn test_wake_host_syncs_on_reconnect() {
        let ctx = Arc::new(StoreContext::in_memory());
        let clock = Arc::new(ManualClock::new(0));
        let queue = Arc::new(PendingQueue::new(ctx.clone(), clock.clone()));
        let remote = Arc::new(InMemoryRemote::new());
        let connectivity = Arc::new(ConnectivityMonitor::new(false));
        let orchestrator = Arc::new(
            SyncOrchestrator::new(
                queue.clone(),
                Arc::new(SyncMetadata::new(ctx)),
                remote.clone(),
                connectivity.clone(),
                clock,
            )
            .with_retry(RetryConfig::test()),
        );

        let host = Arc::new(ConnectivityWakeHost::new(connectivity.clone(), orchestrator));
        let registrar = BackgroundSyncRegistrar::new(Some(host.clone()), "inspection-sync");
        assert!(registrar.try_register());
        assert!(host.is_armed());

        queue.enqueue_field_update("u1", "roof", json!("ok")).await.unwrap();
        connectivity.set_online(true);

        let mut synced = false;
        for _ in 0..100 {
            if remote.write_count() > 0 && queue.list_all_unsynced().await.unwrap().is_empty() {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(synced, "background sync did not run after reconnect");

        host.disarm();
        assert!(!host.is_armed());
    }
}
