// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local persistent store.
//!
//! # Design
//!
//! One key-indexed store holds four logical collections:
//!
//! ```text
//! cached_units         unit_id → CachedRecord<FieldMap>      (index: unit_id, expires_at)
//! pending_updates      unit_id/field_id → PendingFieldUpdate  (index: unit_id, synced)
//! pending_attachments  attachment_id → PendingAttachment+blob (index: unit_id, uploaded)
//! sync_meta            name → scalar                          (no index)
//! ```
//!
//! Backends implement [`LocalStore`]. The engine reaches the store only
//! through a [`StoreContext`], which opens the configured backend once on
//! first use and hands the same handle to every later caller.

mod context;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use context::StoreContext;
pub use memory::InMemoryStore;
pub use sqlite::{SqliteStore, SCHEMA_VERSION};
pub use traits::{Collection, Index, IndexValue, LocalStore, StorageError, StoredRecord};
