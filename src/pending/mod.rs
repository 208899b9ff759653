// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pending write queue and sync bookkeeping.
//!
//! Every UI mutation lands here first, unconditionally. Nothing in this
//! module talks to the network; the sync orchestrator drains it.

pub mod metadata;
pub mod queue;

pub use metadata::SyncMetadata;
pub use queue::{PendingCounts, PendingQueue, QueueRead};
