//! Chaos Testing for Inspection Sync
//!
//! This module tests failure scenarios using:
//! 1. **Wrapping remotes** - precise error injection at specific call counts
//! 2. **Mid-flight interference** - local edits and connectivity loss during a run
//! 3. **Failing local store** - storage errors on the read and write paths
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::task::JoinHandle;

use inspection_sync::storage::{Collection, Index, IndexValue, InMemoryStore, StoredRecord};
use inspection_sync::{
    CompletionPayload, ConnectivityMonitor, EngineConfig, EngineError, FieldMap, InMemoryRemote,
    InspectionEngine, LocalStore, ManualClock, PendingQueue, RemoteAddress, RemoteError,
    RemoteStore, RetryConfig, SnapshotSource, StorageError, StoreContext, SyncError, SyncMetadata,
    SyncOrchestrator,
};

// =============================================================================
// Wrapping Remotes - Precise Error Injection
// =============================================================================

/// Delegates to an [`InMemoryRemote`], failing the first `fail_first` calls.
struct FlakyRemote {
    inner: InMemoryRemote,
    calls: AtomicU64,
    fail_first: u64,
    error: RemoteError,
}

impl FlakyRemote {
    fn new(fail_first: u64, error: RemoteError) -> Self {
        Self {
            inner: InMemoryRemote::new(),
            calls: AtomicU64::new(0),
            fail_first,
            error,
        }
    }

    fn check(&self) -> Result<(), RemoteError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            Err(self.error.clone())
        } else {
            Ok(())
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn fetch_unit_fields(&self, unit_id: &str) -> Result<FieldMap, RemoteError> {
        self.check()?;
        self.inner.fetch_unit_fields(unit_id).await
    }

    async fn write_unit_fields(&self, unit_id: &str, fields: &FieldMap) -> Result<(), RemoteError> {
        self.check()?;
        self.inner.write_unit_fields(unit_id, fields).await
    }

    async fn upload_binary(&self, path: &str, blob: &[u8]) -> Result<RemoteAddress, RemoteError> {
        self.check()?;
        self.inner.upload_binary(path, blob).await
    }

    async fn complete_unit(
        &self,
        unit_id: &str,
        completion: &CompletionPayload,
        completed_at: i64,
    ) -> Result<(), RemoteError> {
        self.check()?;
        self.inner.complete_unit(unit_id, completion, completed_at).await
    }
}

/// Runs a hook inside `write_unit_fields`, before the write lands.
struct InterferingRemote<H> {
    inner: InMemoryRemote,
    on_write: H,
    delay: Duration,
}

#[async_trait]
impl<H> RemoteStore for InterferingRemote<H>
where
    H: Fn(&str) -> Option<JoinHandle<()>> + Send + Sync,
{
    async fn fetch_unit_fields(&self, unit_id: &str) -> Result<FieldMap, RemoteError> {
        self.inner.fetch_unit_fields(unit_id).await
    }

    async fn write_unit_fields(&self, unit_id: &str, fields: &FieldMap) -> Result<(), RemoteError> {
        if let Some(task) = (self.on_write)(unit_id) {
            let _ = task.await;
        }
        tokio::time::sleep(self.delay).await;
        self.inner.write_unit_fields(unit_id, fields).await
    }

    async fn upload_binary(&self, path: &str, blob: &[u8]) -> Result<RemoteAddress, RemoteError> {
        self.inner.upload_binary(path, blob).await
    }

    async fn complete_unit(
        &self,
        unit_id: &str,
        completion: &CompletionPayload,
        completed_at: i64,
    ) -> Result<(), RemoteError> {
        self.inner.complete_unit(unit_id, completion, completed_at).await
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: Some(3),
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        factor: 2.0,
    }
}

struct Parts {
    queue: Arc<PendingQueue>,
    metadata: Arc<SyncMetadata>,
    clock: Arc<ManualClock>,
}

fn parts() -> Parts {
    let ctx = Arc::new(StoreContext::in_memory());
    let clock = Arc::new(ManualClock::new(0));
    Parts {
        queue: Arc::new(PendingQueue::new(ctx.clone(), clock.clone())),
        metadata: Arc::new(SyncMetadata::new(ctx)),
        clock,
    }
}

// =============================================================================
// Transient vs Permanent Remote Failures
// =============================================================================

#[tokio::test]
async fn chaos_transient_failures_recovered_by_retry() {
    let p = parts();
    let remote = Arc::new(FlakyRemote::new(2, RemoteError::Unreachable("timeout".into())));
    let orchestrator = SyncOrchestrator::new(
        p.queue.clone(),
        p.metadata.clone(),
        remote.clone(),
        Arc::new(ConnectivityMonitor::new(true)),
        p.clock.clone(),
    )
    .with_retry(fast_retry());

    p.queue.enqueue_field_update("u1", "roof", json!("ok")).await.unwrap();
    let report = orchestrator.run().await.unwrap();

    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(remote.inner.unit("u1").unwrap()["roof"], json!("ok"));
}

#[tokio::test]
async fn chaos_permanent_rejection_not_retried() {
    let p = parts();
    let remote = Arc::new(FlakyRemote::new(
        1,
        RemoteError::Rejected {
            status: 400,
            message: "bad field".into(),
        },
    ));
    let orchestrator = SyncOrchestrator::new(
        p.queue.clone(),
        p.metadata.clone(),
        remote.clone(),
        Arc::new(ConnectivityMonitor::new(true)),
        p.clock.clone(),
    )
    .with_retry(fast_retry());

    p.queue.enqueue_field_update("u1", "roof", json!("ok")).await.unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("400"));
    // One failed fetch, no retry, no write
    assert_eq!(remote.calls(), 1);
    assert_eq!(p.queue.list_all_unsynced().await.unwrap().len(), 1);
}

// =============================================================================
// Mid-flight Interference
// =============================================================================

#[tokio::test]
async fn chaos_edit_during_write_stays_pending() {
    let p = parts();
    let queue = p.queue.clone();
    let fired = Arc::new(AtomicBool::new(false));
    let fired_hook = fired.clone();

    let remote = Arc::new(InterferingRemote {
        inner: InMemoryRemote::new(),
        delay: Duration::ZERO,
        on_write: move |unit_id: &str| -> Option<JoinHandle<()>> {
            if fired_hook.swap(true, Ordering::SeqCst) {
                return None;
            }
            // The inspector edits the same field again while the write is in flight
            let queue = queue.clone();
            let unit_id = unit_id.to_string();
            Some(tokio::spawn(async move {
                queue
                    .enqueue_field_update(&unit_id, "roof", json!("second edit"))
                    .await
                    .unwrap();
            }))
        },
    });

    let orchestrator = SyncOrchestrator::new(
        p.queue.clone(),
        p.metadata.clone(),
        remote.clone(),
        Arc::new(ConnectivityMonitor::new(true)),
        p.clock.clone(),
    )
    .with_retry(fast_retry());

    p.queue.enqueue_field_update("u1", "roof", json!("first edit")).await.unwrap();
    let report = orchestrator.run().await.unwrap();
    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(report.updates_synced, 0);

    // The remote holds the first edit; the second one is still pending
    assert_eq!(remote.inner.unit("u1").unwrap()["roof"], json!("first edit"));
    let pending = p.queue.list_all_unsynced().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload, json!("second edit"));

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.updates_synced, 1);
    assert_eq!(remote.inner.unit("u1").unwrap()["roof"], json!("second edit"));
}

#[tokio::test]
async fn chaos_connectivity_lost_mid_run() {
    let p = parts();
    let connectivity = Arc::new(ConnectivityMonitor::new(true));
    let monitor = connectivity.clone();

    let remote = Arc::new(InterferingRemote {
        inner: InMemoryRemote::new(),
        delay: Duration::ZERO,
        on_write: move |_: &str| -> Option<JoinHandle<()>> {
            monitor.set_online(false);
            None
        },
    });

    let orchestrator = SyncOrchestrator::new(
        p.queue.clone(),
        p.metadata.clone(),
        remote.clone(),
        connectivity.clone(),
        p.clock.clone(),
    )
    .with_retry(fast_retry());

    for unit in ["a", "b", "c"] {
        p.queue.enqueue_field_update(unit, "roof", json!(unit)).await.unwrap();
    }

    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.units_synced, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("2 unit(s)"));
    assert_eq!(p.queue.list_all_unsynced().await.unwrap().len(), 2);
}

#[tokio::test]
async fn chaos_concurrent_runs_do_not_overlap() {
    let p = parts();
    let remote = Arc::new(InterferingRemote {
        inner: InMemoryRemote::new(),
        delay: Duration::from_millis(50),
        on_write: |_: &str| -> Option<JoinHandle<()>> { None },
    });
    let orchestrator = Arc::new(
        SyncOrchestrator::new(
            p.queue.clone(),
            p.metadata.clone(),
            remote.clone(),
            Arc::new(ConnectivityMonitor::new(true)),
            p.clock.clone(),
        )
        .with_retry(fast_retry()),
    );
    p.queue.enqueue_field_update("u1", "roof", json!("ok")).await.unwrap();

    let first = tokio::spawn({
        let o = orchestrator.clone();
        async move { o.run().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = orchestrator.run().await;

    assert!(matches!(second, Err(SyncError::InProgress)));
    assert!(first.await.unwrap().unwrap().is_clean());
    assert!(!orchestrator.is_running());
    assert_eq!(remote.inner.write_count(), 1);
}

// =============================================================================
// Failing Local Store
// =============================================================================

/// Wraps an [`InMemoryStore`] and fails reads of one collection on demand.
struct FailingReads {
    inner: InMemoryStore,
    collection: Collection,
    failing: AtomicBool,
}

impl FailingReads {
    fn check(&self, collection: Collection) -> Result<(), StorageError> {
        if collection == self.collection && self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Backend("disk I/O error".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LocalStore for FailingReads {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<StoredRecord>, StorageError> {
        self.check(collection)?;
        self.inner.get(collection, key).await
    }

    async fn put(&self, collection: Collection, record: StoredRecord) -> Result<(), StorageError> {
        self.inner.put(collection, record).await
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StorageError> {
        self.inner.delete(collection, key).await
    }

    async fn query_by_index(
        &self,
        collection: Collection,
        index: Index,
        value: &IndexValue,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        self.check(collection)?;
        self.inner.query_by_index(collection, index, value).await
    }

    async fn scan(&self, collection: Collection) -> Result<Vec<StoredRecord>, StorageError> {
        self.check(collection)?;
        self.inner.scan(collection).await
    }

    fn schema_version(&self) -> i64 {
        self.inner.schema_version()
    }
}

fn engine_over(store: Arc<FailingReads>, remote: Arc<InMemoryRemote>, online: bool) -> InspectionEngine {
    InspectionEngine::with_parts(
        EngineConfig {
            remote_max_retries: 1,
            ..Default::default()
        },
        Arc::new(StoreContext::from_store(store)),
        remote,
        Arc::new(ConnectivityMonitor::new(online)),
        Arc::new(ManualClock::new(0)),
    )
}

#[tokio::test]
async fn chaos_cache_read_failure_degrades_to_miss() {
    let store = Arc::new(FailingReads {
        inner: InMemoryStore::new(),
        collection: Collection::CachedUnits,
        failing: AtomicBool::new(true),
    });
    let remote = Arc::new(InMemoryRemote::new());
    remote.set_field("u1", "roof", json!("remote"));

    let engine = engine_over(store, remote, true);
    let view = engine.read_unit("u1").await.unwrap();
    assert_eq!(view.source, SnapshotSource::Remote);
    assert_eq!(view.fields["roof"], json!("remote"));
}

#[tokio::test]
async fn chaos_unreadable_queue_fails_sync_without_crashing() {
    let store = Arc::new(FailingReads {
        inner: InMemoryStore::new(),
        collection: Collection::PendingUpdates,
        failing: AtomicBool::new(false),
    });
    let remote = Arc::new(InMemoryRemote::new());
    let engine = engine_over(store.clone(), remote.clone(), false);
    engine.record_field_update("u1", "roof", json!("x")).await.unwrap();

    store.failing.store(true, Ordering::SeqCst);
    let p = parts();
    let orchestrator = SyncOrchestrator::new(
        Arc::new(PendingQueue::new(Arc::new(StoreContext::from_store(store.clone())), p.clock.clone())),
        p.metadata,
        remote.clone(),
        Arc::new(ConnectivityMonitor::new(true)),
        p.clock,
    );
    assert!(matches!(orchestrator.run().await, Err(SyncError::Storage(_))));
    assert!(!orchestrator.is_running());

    // Reads of the same unit report the storage failure instead of hiding edits
    assert!(matches!(engine.read_unit("u1").await, Err(EngineError::Storage(_))));

    // Recovery: once the disk is readable the edit is still there
    store.failing.store(false, Ordering::SeqCst);
    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.updates_synced, 1);
    assert_eq!(remote.unit("u1").unwrap()["roof"], json!("x"));
}

#[tokio::test]
async fn chaos_malformed_queue_entries_do_not_strand_valid_work() {
    let store = Arc::new(FailingReads {
        inner: InMemoryStore::new(),
        collection: Collection::PendingUpdates,
        failing: AtomicBool::new(false),
    });
    let remote = Arc::new(InMemoryRemote::new());
    let connectivity = Arc::new(ConnectivityMonitor::new(false));
    let engine = InspectionEngine::with_parts(
        EngineConfig {
            remote_max_retries: 1,
            ..Default::default()
        },
        Arc::new(StoreContext::from_store(store.clone())),
        remote.clone(),
        connectivity.clone(),
        Arc::new(ManualClock::new(0)),
    );
    engine.record_field_update("good", "roof", json!("sound")).await.unwrap();
    engine
        .record_attachment("good", "photos", vec![1, 2, 3], "roof.jpg")
        .await
        .unwrap();

    // Rows that no longer match the record layout, e.g. after a bad write
    store
        .put(
            Collection::PendingUpdates,
            StoredRecord::new("3:bad/x", json!({"unit_id": "bad", "synced": false})),
        )
        .await
        .unwrap();
    store
        .put(
            Collection::PendingAttachments,
            StoredRecord::new("broken", json!({"uploaded": false})).with_blob(vec![0]),
        )
        .await
        .unwrap();

    connectivity.set_online(true);
    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.attachments_uploaded, 1);
    assert_eq!(report.updates_synced, 1);
    assert_eq!(remote.unit("good").unwrap()["roof"], json!("sound"));

    // Each bad row is reported on its own line
    let skipped: Vec<_> = report
        .errors
        .iter()
        .filter(|e| e.starts_with("queue entry skipped:"))
        .collect();
    assert_eq!(skipped.len(), 2, "{:?}", report.errors);
    assert!(skipped.iter().any(|e| e.contains("3:bad/x")));
    assert!(skipped.iter().any(|e| e.contains("broken")));
    assert!(!report.is_clean());

    // The valid unit is not held back by the bad row
    let done = engine
        .complete_unit(
            "good",
            CompletionPayload {
                classification: "pass".into(),
                summary: "ok".into(),
                details: None,
            },
        )
        .await
        .unwrap();
    assert!(done.synced);
}
