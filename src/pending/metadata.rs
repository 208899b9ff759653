// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use serde_json::Value;

use crate::storage::{Collection, StorageError, StoreContext, StoredRecord};

const LAST_SYNC: &str = "last_sync";

/// Flat key/value bookkeeping over the `sync_meta` collection.
pub struct SyncMetadata {
    ctx: Arc<StoreContext>,
}

impl SyncMetadata {
    pub fn new(ctx: Arc<StoreContext>) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, name: &str) -> Result<Option<Value>, StorageError> {
        let store = self.ctx.handle().await?;
        Ok(store.get(Collection::SyncMeta, name).await?.map(|r| r.value))
    }

    pub async fn set(&self, name: &str, value: Value) -> Result<(), StorageError> {
        let store = self.ctx.handle().await?;
        store.put(Collection::SyncMeta, StoredRecord::new(name, value)).await
    }

    /// Time of the last sync run that finished without errors (epoch millis).
    pub async fn last_sync(&self) -> Result<Option<i64>, StorageError> {
        Ok(self.get(LAST_SYNC).await?.and_then(|v| v.as_i64()))
    }

    pub async fn set_last_sync(&self, at: i64) -> Result<(), StorageError> {
        self.set(LAST_SYNC, Value::from(at)).await
    }
}
