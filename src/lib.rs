//! # Inspection Sync
//!
//! An offline-first local cache and sync engine for field inspections.
//!
//! An inspector records findings and photos against a unit of work while the
//! network comes and goes. Everything lands in a durable local queue first;
//! the engine later reconciles it with the remote system of record without
//! losing, duplicating or silently overwriting data.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     InspectionEngine                        │
//! │  • record_field_update / record_attachment (always local)  │
//! │  • read_unit (cache + pending overlay)                     │
//! │  • complete_unit (online only)                             │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │ PendingQueue   │  │ ExpiryManager    │  │ SyncOrchestrator │
//! │ field updates  │  │ TTL'd snapshots  │  │ 1. attachments   │
//! │ attachments    │  │ lazy + sweep     │  │ 2. per-unit merge│
//! └────────────────┘  └──────────────────┘  └──────────────────┘
//!          │                    │                     │
//!          └─────────┬──────────┘                     ▼
//!                    ▼                         ┌──────────────┐
//!     ┌────────────────────────────┐           │ RemoteStore  │
//!     │ LocalStore (SQLite/memory) │           └──────────────┘
//!     │ schema-versioned, indexed  │
//!     └────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use inspection_sync::{ConnectivityMonitor, EngineConfig, InMemoryRemote, InspectionEngine};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = EngineConfig {
//!         store_path: Some("./inspections.db".into()),
//!         ..Default::default()
//!     };
//!     let connectivity = Arc::new(ConnectivityMonitor::new(false));
//!     let engine = InspectionEngine::new(config, Arc::new(InMemoryRemote::new()), connectivity.clone());
//!
//!     engine.record_field_update("insp-42", "roof", json!("moss, minor")).await.unwrap();
//!
//!     // Later, when the platform reports the network is back
//!     connectivity.set_online(true);
//!     let report = engine.sync_now().await.unwrap();
//!     println!("{report}");
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: the [`InspectionEngine`] facade, sync orchestration, background wake-up
//! - [`storage`]: the local store (SQLite, memory) and its lazy handle
//! - [`eviction`]: TTL enforcement for cached snapshots
//! - [`pending`]: the pending write queue and sync metadata
//! - [`merge`]: merge-on-read reconciliation
//! - [`remote`]: the remote contract and an in-memory implementation
//! - [`resilience`]: retry and connectivity
//! - [`metrics`]: backend-agnostic instrumentation

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod eviction;
pub mod merge;
pub mod metrics;
pub mod pending;
pub mod record;
pub mod remote;
pub mod resilience;
pub mod storage;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use coordinator::{
    BackgroundHost, BackgroundSyncRegistrar, ConnectivityWakeHost, EngineError, InspectionEngine,
    SyncError, SyncOrchestrator, SyncPhase, SyncReport,
};
pub use eviction::ExpiryManager;
pub use merge::{merged_view, overlay, MergedUnit, Snapshot, SnapshotSource};
pub use pending::{PendingCounts, PendingQueue, SyncMetadata};
pub use record::{
    AttachmentId, CachedRecord, CompletionPayload, FieldKey, FieldMap, PendingAttachment,
    PendingCompletion, PendingFieldUpdate, RemoteAddress, SyncReceipt,
};
pub use remote::{InMemoryRemote, RemoteError, RemoteStore};
pub use resilience::connectivity::{Connectivity, ConnectivityMonitor};
pub use resilience::retry::RetryConfig;
pub use storage::{LocalStore, StorageError, StoreContext};
