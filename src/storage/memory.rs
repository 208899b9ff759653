// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;
use super::traits::{Collection, Index, IndexValue, LocalStore, StorageError, StoredRecord};

/// Volatile local store, used for tests and sessions without a store path.
pub struct InMemoryStore {
    data: DashMap<(Collection, String), StoredRecord>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current record count across all collections
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn collect_sorted<F>(&self, collection: Collection, mut keep: F) -> Vec<StoredRecord>
    where
        F: FnMut(&StoredRecord) -> bool,
    {
        let mut records: Vec<StoredRecord> = self
            .data
            .iter()
            .filter(|entry| entry.key().0 == collection && keep(entry.value()))
            .map(|entry| {
                let record = entry.value();
                StoredRecord::new(record.key.clone(), record.value.clone())
            })
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for InMemoryStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<StoredRecord>, StorageError> {
        Ok(self
            .data
            .get(&(collection, key.to_string()))
            .map(|r| r.value().clone()))
    }

    async fn put(&self, collection: Collection, record: StoredRecord) -> Result<(), StorageError> {
        self.data.insert((collection, record.key.clone()), record);
        Ok(())
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StorageError> {
        self.data.remove(&(collection, key.to_string()));
        Ok(())
    }

    async fn query_by_index(
        &self,
        collection: Collection,
        index: Index,
        value: &IndexValue,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        if collection.key_path(index).is_none() {
            return Err(StorageError::UnknownIndex { collection, index });
        }
        Ok(self.collect_sorted(collection, |record| {
            collection.index_value(index, &record.value).as_ref() == Some(value)
        }))
    }

    async fn count_by_index(
        &self,
        collection: Collection,
        index: Index,
        value: &IndexValue,
    ) -> Result<usize, StorageError> {
        if collection.key_path(index).is_none() {
            return Err(StorageError::UnknownIndex { collection, index });
        }
        Ok(self
            .data
            .iter()
            .filter(|entry| {
                entry.key().0 == collection
                    && collection.index_value(index, &entry.value().value).as_ref() == Some(value)
            })
            .count())
    }

    async fn scan(&self, collection: Collection) -> Result<Vec<StoredRecord>, StorageError> {
        Ok(self.collect_sorted(collection, |_| true))
    }

    fn schema_version(&self) -> i64 {
        super::sqlite::SCHEMA_VERSION
    }
}
