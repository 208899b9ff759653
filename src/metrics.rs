// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for inspection-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `inspection_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: field_update, attachment
//! - `outcome`: clean, partial, offline, in_progress, storage_error
//! - `status`: success, error, hit, miss, expired

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a local store open
pub fn record_store_open(backend: &str) {
    counter!(
        "inspection_sync_store_opens_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record a cache lookup result (hit, miss, expired)
pub fn record_cache_lookup(status: &str) {
    counter!(
        "inspection_sync_cache_lookups_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record evicted cache records
pub fn record_evictions(count: usize) {
    counter!("inspection_sync_cache_evictions_total").increment(count as u64);
}

/// Record a local enqueue
pub fn record_enqueued(kind: &str) {
    counter!(
        "inspection_sync_enqueued_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Set current unsynced queue size
pub fn set_pending_entries(kind: &str, count: usize) {
    gauge!(
        "inspection_sync_pending_entries",
        "kind" => kind.to_string()
    )
    .set(count as f64);
}

/// Set reachability (1 = online)
pub fn set_online(online: bool) {
    gauge!("inspection_sync_online").set(if online { 1.0 } else { 0.0 });
}

/// Record a finished sync invocation
pub fn record_sync_run(outcome: &str) {
    counter!(
        "inspection_sync_runs_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an attachment upload attempt
pub fn record_attachment_upload(status: &str) {
    counter!(
        "inspection_sync_attachment_uploads_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a per-unit field push attempt
pub fn record_unit_push(status: &str, updates: usize) {
    counter!(
        "inspection_sync_unit_pushes_total",
        "status" => status.to_string()
    )
    .increment(1);
    if status == "success" {
        counter!("inspection_sync_updates_synced_total").increment(updates as u64);
    }
}

/// Record sync phase duration
pub fn record_phase_duration(phase: &str, duration: Duration) {
    histogram!(
        "inspection_sync_phase_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a background registration attempt
pub fn record_background_registration(registered: bool) {
    counter!(
        "inspection_sync_background_registrations_total",
        "registered" => registered.to_string()
    )
    .increment(1);
}

/// Times a sync phase, recording on drop.
pub struct PhaseTimer {
    phase: &'static str,
    start: Instant,
}

impl PhaseTimer {
    pub fn new(phase: &'static str) -> Self {
        Self {
            phase,
            start: Instant::now(),
        }
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        record_phase_duration(self.phase, self.start.elapsed());
    }
}
