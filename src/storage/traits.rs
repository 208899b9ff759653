// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Collection {collection} has no index {index}")]
    UnknownIndex {
        collection: Collection,
        index: Index,
    },
    #[error("Malformed record '{key}' in {collection}: {reason}")]
    Malformed {
        collection: Collection,
        key: String,
        reason: String,
    },
    #[error("Data corruption detected for '{id}': expected hash {expected}, got {actual}")]
    Corruption {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("Store schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
}

/// The four logical collections of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    /// Read-through snapshots of remote units, with expiry
    CachedUnits,
    /// Field updates not yet confirmed by the remote
    PendingUpdates,
    /// Binary attachments not yet uploaded
    PendingAttachments,
    /// Scalar bookkeeping (`last_sync`, ...)
    SyncMeta,
}

/// Secondary indexes over record bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Index {
    UnitId,
    Synced,
    ExpiresAt,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::CachedUnits,
        Collection::PendingUpdates,
        Collection::PendingAttachments,
        Collection::SyncMeta,
    ];

    /// Stable name used as the on-disk discriminator.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CachedUnits => "cached_units",
            Self::PendingUpdates => "pending_updates",
            Self::PendingAttachments => "pending_attachments",
            Self::SyncMeta => "sync_meta",
        }
    }

    /// JSON field an index reads in this collection, if the collection carries it.
    #[must_use]
    pub fn key_path(&self, index: Index) -> Option<&'static str> {
        match (self, index) {
            (Self::CachedUnits, Index::UnitId) => Some("unit_id"),
            (Self::CachedUnits, Index::ExpiresAt) => Some("expires_at"),
            (Self::PendingUpdates, Index::UnitId) => Some("unit_id"),
            (Self::PendingUpdates, Index::Synced) => Some("synced"),
            (Self::PendingAttachments, Index::UnitId) => Some("unit_id"),
            (Self::PendingAttachments, Index::Synced) => Some("uploaded"),
            _ => None,
        }
    }

    /// Extract the indexed value from a record body.
    pub fn index_value(&self, index: Index, value: &Value) -> Option<IndexValue> {
        let path = self.key_path(index)?;
        IndexValue::from_json(value.get(path)?)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::fmt::Display for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnitId => write!(f, "unit_id"),
            Self::Synced => write!(f, "synced"),
            Self::ExpiresAt => write!(f, "expires_at"),
        }
    }
}

/// A value an index can be queried by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    Text(String),
    Int(i64),
    Bool(bool),
}

impl IndexValue {
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_i64().map(Self::Int),
            _ => None,
        }
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for IndexValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for IndexValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

/// A record as the store sees it: a JSON body plus an optional binary payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: String,
    pub value: Value,
    pub blob: Option<Vec<u8>>,
}

impl StoredRecord {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            blob: None,
        }
    }

    #[must_use]
    pub fn with_blob(mut self, blob: Vec<u8>) -> Self {
        self.blob = Some(blob);
        self
    }
}

/// Key-indexed local store.
///
/// Not-found is `Ok(None)` / an empty list; `Err` means the backend itself failed.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<StoredRecord>, StorageError>;
    async fn put(&self, collection: Collection, record: StoredRecord) -> Result<(), StorageError>;
    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StorageError>;

    /// Equality lookup on a secondary index, ordered by key.
    ///
    /// Returned records carry no `blob`; binary payloads are only loaded by [`LocalStore::get`].
    async fn query_by_index(
        &self,
        collection: Collection,
        index: Index,
        value: &IndexValue,
    ) -> Result<Vec<StoredRecord>, StorageError>;

    /// Number of records matching an index value.
    async fn count_by_index(
        &self,
        collection: Collection,
        index: Index,
        value: &IndexValue,
    ) -> Result<usize, StorageError> {
        Ok(self.query_by_index(collection, index, value).await?.len())
    }

    /// Every record of a collection, ordered by key, without blobs.
    async fn scan(&self, collection: Collection) -> Result<Vec<StoredRecord>, StorageError>;

    /// Write several records of one collection together.
    /// Default implementation falls back to sequential puts.
    async fn put_batch(&self, collection: Collection, records: Vec<StoredRecord>) -> Result<usize, StorageError> {
        let written = records.len();
        for record in records {
            self.put(collection, record).await?;
        }
        Ok(written)
    }

    /// Schema version the store was opened at.
    fn schema_version(&self) -> i64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_paths() {
        assert_eq!(Collection::PendingUpdates.key_path(Index::Synced), Some("synced"));
        assert_eq!(Collection::PendingAttachments.key_path(Index::Synced), Some("uploaded"));
        assert_eq!(Collection::CachedUnits.key_path(Index::ExpiresAt), Some("expires_at"));
        assert_eq!(Collection::SyncMeta.key_path(Index::UnitId), None);
        assert_eq!(Collection::PendingUpdates.key_path(Index::ExpiresAt), None);
    }

    #[test]
    fn test_index_value_extraction() {
        let body = json!({"unit_id": "insp-1", "uploaded": false, "payload": {"x": 1}});
        let c = Collection::PendingAttachments;

        assert_eq!(c.index_value(Index::UnitId, &body), Some(IndexValue::from("insp-1")));
        assert_eq!(c.index_value(Index::Synced, &body), Some(IndexValue::Bool(false)));
        assert_eq!(c.index_value(Index::ExpiresAt, &body), None);
    }

    #[test]
    fn test_index_value_ignores_composite_json() {
        assert_eq!(IndexValue::from_json(&json!({"a": 1})), None);
        assert_eq!(IndexValue::from_json(&json!(1.5)), None);
        assert_eq!(IndexValue::from_json(&json!(7)), Some(IndexValue::Int(7)));
    }
}
