// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Expiry and eviction of cached read-through records.
//!
//! # Policy
//!
//! ```text
//! put(unit)          cached_at = now, expires_at = now + ttl (24h default)
//! get_if_fresh(unit) now <  expires_at → hit
//!                    now >= expires_at → delete, miss   (lazy, on the read path)
//! sweep_expired()    scan cached_units, delete every stale record
//! ```
//!
//! Pending updates and attachments are never expired here: they live until
//! the remote confirms them.

pub mod expiry;

pub use expiry::ExpiryManager;
