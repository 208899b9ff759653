// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote system of record.
//!
//! The engine treats the remote as an opaque record store: fetch a unit's
//! field map, write one back, upload a binary, complete a unit. Transport
//! and authentication belong to the implementor of [`RemoteStore`].

pub mod memory;
pub mod traits;

pub use memory::InMemoryRemote;
pub use traits::{RemoteError, RemoteStore};
