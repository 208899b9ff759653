// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite backend for the on-device store.
//!
//! All four collections share one table; index columns are extracted from
//! the JSON body at write time so `query_by_index` is a plain indexed lookup:
//!
//! ```sql
//! CREATE TABLE records (
//!   collection TEXT NOT NULL,   -- cached_units | pending_updates | ...
//!   key TEXT NOT NULL,
//!   value TEXT NOT NULL,        -- JSON body
//!   blob BLOB,                  -- attachment bytes
//!   unit_id TEXT,               -- Index::UnitId
//!   synced INTEGER,             -- Index::Synced (synced / uploaded)
//!   expires_at INTEGER,         -- Index::ExpiresAt
//!   updated_at INTEGER NOT NULL,
//!   PRIMARY KEY (collection, key)
//! )
//! ```
//!
//! ## Schema upgrades
//!
//! Migrations are additive and run in one transaction on open. The reached
//! version lives in `schema_version`. Pending rows are never dropped: a file
//! written by a newer build is refused rather than touched.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqliteConnection};
use tracing::{debug, info};

use super::traits::{Collection, Index, IndexValue, LocalStore, StorageError, StoredRecord};
use crate::resilience::retry::{retry, RetryConfig};

/// Version the code expects after migrations.
pub const SCHEMA_VERSION: i64 = 3;

const MIGRATIONS: &[(i64, &[&str])] = &[
    (1, &[
        r#"
        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            blob BLOB,
            unit_id TEXT,
            synced INTEGER,
            expires_at INTEGER,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, key)
        )
        "#,
    ]),
    (2, &[
        "CREATE INDEX IF NOT EXISTS idx_records_unit ON records (collection, unit_id)",
        "CREATE INDEX IF NOT EXISTS idx_records_synced ON records (collection, synced)",
        "CREATE INDEX IF NOT EXISTS idx_records_expires ON records (collection, expires_at)",
    ]),
    // Pending update keys become length-prefixed (see `FieldKey::storage_key`)
    (3, &[
        r#"
        UPDATE records
        SET key = length(CAST(json_extract(value, '$.unit_id') AS BLOB))
                  || ':' || json_extract(value, '$.unit_id')
                  || '/' || json_extract(value, '$.field_id')
        WHERE collection = 'pending_updates'
          AND json_type(value, '$.unit_id') = 'text'
          AND json_type(value, '$.field_id') = 'text'
        "#,
    ]),
];

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn index_column(index: Index) -> &'static str {
    match index {
        Index::UnitId => "unit_id",
        Index::Synced => "synced",
        Index::ExpiresAt => "expires_at",
    }
}

fn bind_index_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &IndexValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        IndexValue::Text(s) => query.bind(s.clone()),
        IndexValue::Int(n) => query.bind(*n),
        IndexValue::Bool(b) => query.bind(i64::from(*b)),
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
    path: String,
    version: i64,
}

impl SqliteStore {
    /// Open (creating if missing) and upgrade the store at `path`.
    ///
    /// Idempotent: re-opening an up-to-date file changes nothing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = retry("sqlite_open", &RetryConfig::startup(), || async {
            SqlitePoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .connect_with(options.clone())
                .await
                .map_err(backend)
        })
        .await?;

        let version = Self::migrate(&pool).await?;
        info!(path = %path_str, version, "Local store opened");

        Ok(Self {
            pool,
            path: path_str,
            version,
        })
    }

    /// Path of the SQLite file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(pool: &SqlitePool) -> Result<i64, StorageError> {
        let mut tx = pool.begin().await.map_err(backend)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (id INTEGER PRIMARY KEY CHECK (id = 1), version INTEGER NOT NULL)",
        )
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        let current: i64 = sqlx::query("SELECT version FROM schema_version WHERE id = 1")
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
            .map(|row| row.try_get::<i64, _>("version"))
            .transpose()
            .map_err(backend)?
            .unwrap_or(0);

        if current > SCHEMA_VERSION {
            return Err(StorageError::SchemaTooNew {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        for (version, statements) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
            for statement in statements.iter() {
                sqlx::query(statement).execute(&mut *tx).await.map_err(backend)?;
            }
            debug!(version, "Applied store migration");
        }

        if current < SCHEMA_VERSION {
            sqlx::query(
                "INSERT INTO schema_version (id, version) VALUES (1, ?) ON CONFLICT(id) DO UPDATE SET version = excluded.version",
            )
            .bind(SCHEMA_VERSION)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
            info!(from = current, to = SCHEMA_VERSION, "Local store schema upgraded");
        }

        tx.commit().await.map_err(backend)?;
        Ok(SCHEMA_VERSION)
    }

    async fn upsert(
        conn: &mut SqliteConnection,
        collection: Collection,
        record: &StoredRecord,
    ) -> Result<(), StorageError> {
        let body = serde_json::to_string(&record.value).map_err(|e| StorageError::Malformed {
            collection,
            key: record.key.clone(),
            reason: e.to_string(),
        })?;

        let unit_id = match collection.index_value(Index::UnitId, &record.value) {
            Some(IndexValue::Text(s)) => Some(s),
            _ => None,
        };
        let synced = match collection.index_value(Index::Synced, &record.value) {
            Some(IndexValue::Bool(b)) => Some(i64::from(b)),
            _ => None,
        };
        let expires_at = match collection.index_value(Index::ExpiresAt, &record.value) {
            Some(IndexValue::Int(n)) => Some(n),
            _ => None,
        };
        let updated_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;

        sqlx::query(
            "INSERT INTO records (collection, key, value, blob, unit_id, synced, expires_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(collection, key) DO UPDATE SET
                value = excluded.value,
                blob = excluded.blob,
                unit_id = excluded.unit_id,
                synced = excluded.synced,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
        )
        .bind(collection.name())
        .bind(&record.key)
        .bind(body)
        .bind(record.blob.clone())
        .bind(unit_id)
        .bind(synced)
        .bind(expires_at)
        .bind(updated_at)
        .execute(&mut *conn)
        .await
        .map_err(backend)?;

        Ok(())
    }

    /// Rows selected without a `blob` column decode with `blob: None`.
    fn decode(collection: Collection, row: &SqliteRow, with_blob: bool) -> Result<StoredRecord, StorageError> {
        let key: String = row.try_get("key").map_err(backend)?;
        let body: String = row.try_get("value").map_err(backend)?;
        let blob: Option<Vec<u8>> = if with_blob {
            row.try_get("blob").map_err(backend)?
        } else {
            None
        };

        let value = serde_json::from_str(&body).map_err(|e| StorageError::Malformed {
            collection,
            key: key.clone(),
            reason: e.to_string(),
        })?;

        Ok(StoredRecord { key, value, blob })
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<StoredRecord>, StorageError> {
        let row = sqlx::query("SELECT key, value, blob FROM records WHERE collection = ? AND key = ?")
            .bind(collection.name())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(|r| Self::decode(collection, &r, true)).transpose()
    }

    async fn put(&self, collection: Collection, record: StoredRecord) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        Self::upsert(&mut conn, collection, &record).await
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM records WHERE collection = ? AND key = ?")
            .bind(collection.name())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
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

        let sql = format!(
            "SELECT key, value FROM records WHERE collection = ? AND {} = ? ORDER BY key",
            index_column(index)
        );
        let query = bind_index_value(sqlx::query(&sql).bind(collection.name()), value);

        let rows = query.fetch_all(&self.pool).await.map_err(backend)?;
        rows.iter().map(|r| Self::decode(collection, r, false)).collect()
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

        let sql = format!(
            "SELECT COUNT(*) AS n FROM records WHERE collection = ? AND {} = ?",
            index_column(index)
        );
        let row = bind_index_value(sqlx::query(&sql).bind(collection.name()), value)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let n: i64 = row.try_get("n").map_err(backend)?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    async fn scan(&self, collection: Collection) -> Result<Vec<StoredRecord>, StorageError> {
        let rows = sqlx::query("SELECT key, value FROM records WHERE collection = ? ORDER BY key")
            .bind(collection.name())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.iter().map(|r| Self::decode(collection, r, false)).collect()
    }

    /// All-or-nothing: the batch is written in one transaction.
    async fn put_batch(&self, collection: Collection, records: Vec<StoredRecord>) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;
        for record in &records {
            Self::upsert(&mut tx, collection, record).await?;
        }
        tx.commit().await.map_err(backend)?;

        debug!(collection = %collection, written = records.len(), "Batch committed");
        Ok(records.len())
    }

    fn schema_version(&self) -> i64 {
        self.version
    }
}
