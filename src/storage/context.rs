// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use super::memory::InMemoryStore;
use super::sqlite::SqliteStore;
use super::traits::{LocalStore, StorageError};

/// Where the store lives.
#[derive(Debug, Clone)]
enum StoreTarget {
    Memory,
    Sqlite(String),
    Provided,
}

/// Injected, lazily opened store handle.
///
/// The first caller of [`handle`](Self::handle) opens (and upgrades) the
/// backend; concurrent first callers wait on the same open, and everyone
/// after reuses the handle. A failed open is not memoized, so the next
/// caller retries it.
pub struct StoreContext {
    target: StoreTarget,
    cell: OnceCell<Arc<dyn LocalStore>>,
}

impl StoreContext {
    /// Volatile store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            target: StoreTarget::Memory,
            cell: OnceCell::new(),
        }
    }

    /// SQLite file, opened on first use.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            target: StoreTarget::Sqlite(path.into()),
            cell: OnceCell::new(),
        }
    }

    /// Wrap an already opened store.
    pub fn from_store(store: Arc<dyn LocalStore>) -> Self {
        Self {
            target: StoreTarget::Provided,
            cell: OnceCell::new_with(Some(store)),
        }
    }

    /// From an optional store path (None = in-memory).
    pub fn from_path(path: Option<&str>) -> Self {
        match path {
            Some(p) => Self::sqlite(p),
            None => Self::in_memory(),
        }
    }

    /// Get the store, opening it on first call.
    pub async fn handle(&self) -> Result<Arc<dyn LocalStore>, StorageError> {
        let store = self
            .cell
            .get_or_try_init(|| async {
                let store: Arc<dyn LocalStore> = match &self.target {
                    StoreTarget::Memory => {
                        info!("Using in-memory local store");
                        Arc::new(InMemoryStore::new())
                    }
                    StoreTarget::Sqlite(path) => Arc::new(SqliteStore::open(path).await?),
                    StoreTarget::Provided => {
                        return Err(StorageError::Backend("provided store missing".to_string()))
                    }
                };
                crate::metrics::record_store_open(match &self.target {
                    StoreTarget::Sqlite(_) => "sqlite",
                    _ => "memory",
                });
                Ok(store)
            })
            .await?;
        Ok(store.clone())
    }

    /// Whether the store has been opened yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.cell.initialized()
    }
}
