// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Network reachability signal.
//!
//! The engine consults [`Connectivity::is_online`] before any sync attempt
//! and degrades to a well-defined offline result when it reports `false`.
//! [`ConnectivityMonitor`] is the default implementation: the host feeds it
//! platform reachability events via [`ConnectivityMonitor::set_online`], and
//! remote call outcomes via `record_success` / `record_failure`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};

/// Consecutive remote failures before the monitor reports offline.
const FAILURE_THRESHOLD: u64 = 3;

/// A boolean "is the network currently reachable" check.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    /// Watch reachability changes, if the implementation can publish them.
    fn subscribe(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

/// Reachability tracker with change notification.
pub struct ConnectivityMonitor {
    /// Last known reachability
    online: AtomicBool,
    /// Consecutive remote failure count
    failures: AtomicU64,
    /// Change broadcast (for background wake-up)
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self {
            online: AtomicBool::new(initially_online),
            failures: AtomicU64::new(0),
            tx,
        }
    }

    /// Record a platform reachability event.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::AcqRel);
        if online {
            self.failures.store(0, Ordering::Release);
        }
        if was != online {
            if online {
                info!("Connectivity restored");
            } else {
                warn!("Connectivity lost, writes will stay queued locally");
            }
            crate::metrics::set_online(online);
            self.tx.send_replace(online);
        }
    }

    /// Record a successful remote call.
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        if !self.online.load(Ordering::Acquire) {
            self.set_online(true);
        }
    }

    /// Record a failed remote call. Repeated failures flip the signal offline.
    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= FAILURE_THRESHOLD && self.online.load(Ordering::Acquire) {
            self.set_online(false);
        }
    }

    /// Get consecutive failure count.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> Option<watch::Receiver<bool>> {
        Some(self.tx.subscribe())
    }
}
