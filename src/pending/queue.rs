// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable queue of unconfirmed field updates and staged attachments.
//!
//! Enqueue never touches the network and always succeeds unless the local
//! store itself fails. Every enqueue stamps a fresh revision, and
//! [`PendingQueue::mark_synced`] only confirms the revision a sync run
//! actually sent, so an edit made while that run was in flight stays
//! pending for the next one.

use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::record::{AttachmentId, FieldKey, PendingAttachment, PendingFieldUpdate, RemoteAddress, SyncReceipt};
use crate::storage::{Collection, Index, LocalStore, StorageError, StoreContext, StoredRecord};

/// Queue sizes, for a "N changes waiting" indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub field_updates: usize,
    pub attachments: usize,
}

impl PendingCounts {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.field_updates == 0 && self.attachments == 0
    }
}

/// Entries read from the queue, plus the stored records that no longer decode.
///
/// A malformed record is reported on its own and never hides the valid ones.
#[derive(Debug)]
pub struct QueueRead<T> {
    pub entries: Vec<T>,
    pub malformed: Vec<StorageError>,
}

impl<T: DeserializeOwned> QueueRead<T> {
    fn decode_all(collection: Collection, records: Vec<StoredRecord>) -> Self {
        let mut entries = Vec::with_capacity(records.len());
        let mut malformed = Vec::new();
        for record in records {
            match decode(collection, record) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable queue entry");
                    malformed.push(e);
                }
            }
        }
        Self { entries, malformed }
    }
}

pub struct PendingQueue {
    ctx: Arc<StoreContext>,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write spans (enqueue vs. mark)
    write_lock: Mutex<()>,
}

fn decode<T: DeserializeOwned>(collection: Collection, record: StoredRecord) -> Result<T, StorageError> {
    serde_json::from_value(record.value).map_err(|e| StorageError::Malformed {
        collection,
        key: record.key,
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(collection: Collection, key: &str, value: &T) -> Result<Value, StorageError> {
    serde_json::to_value(value).map_err(|e| StorageError::Malformed {
        collection,
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Best-effort MIME type from a file extension.
fn guess_content_type(filename: &str) -> Option<String> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "heic" => "image/heic",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime.to_string())
}

impl PendingQueue {
    pub fn new(ctx: Arc<StoreContext>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ctx,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    async fn store(&self) -> Result<Arc<dyn LocalStore>, StorageError> {
        self.ctx.handle().await
    }

    /// Record a field value locally, replacing any earlier entry for the same key.
    #[tracing::instrument(skip(self, payload))]
    pub async fn enqueue_field_update(
        &self,
        unit_id: &str,
        field_id: &str,
        payload: Value,
    ) -> Result<PendingFieldUpdate, StorageError> {
        let update = PendingFieldUpdate {
            unit_id: unit_id.to_string(),
            field_id: field_id.to_string(),
            payload,
            created_at: self.clock.now_millis(),
            revision: uuid::Uuid::new_v4().to_string(),
            synced: false,
        };
        let key = update.key().storage_key();
        let value = encode(Collection::PendingUpdates, &key, &update)?;

        let _guard = self.write_lock.lock().await;
        self.store()
            .await?
            .put(Collection::PendingUpdates, StoredRecord::new(key, value))
            .await?;

        debug!(revision = %update.revision, "Field update queued");
        crate::metrics::record_enqueued("field_update");
        Ok(update)
    }

    /// Stage a binary locally. The returned id is usable immediately,
    /// e.g. as [`AttachmentId::reference`] inside a field payload.
    #[tracing::instrument(skip(self, blob), fields(size = blob.len()))]
    pub async fn enqueue_attachment(
        &self,
        unit_id: &str,
        field_id: &str,
        blob: Vec<u8>,
        filename: &str,
    ) -> Result<AttachmentId, StorageError> {
        let id = AttachmentId::generate();
        let attachment = PendingAttachment {
            id: id.clone(),
            unit_id: unit_id.to_string(),
            field_id: field_id.to_string(),
            filename: filename.to_string(),
            content_type: guess_content_type(filename),
            sha256: hex::encode(Sha256::digest(&blob)),
            size_bytes: blob.len(),
            created_at: self.clock.now_millis(),
            uploaded: false,
            remote_address: None,
        };
        let value = encode(Collection::PendingAttachments, id.as_str(), &attachment)?;

        let _guard = self.write_lock.lock().await;
        self.store()
            .await?
            .put(
                Collection::PendingAttachments,
                StoredRecord::new(id.as_str(), value).with_blob(blob),
            )
            .await?;

        debug!(attachment_id = %id, "Attachment staged");
        crate::metrics::record_enqueued("attachment");
        Ok(id)
    }

    /// Unsynced updates for one unit, ordered by field id.
    pub async fn list_pending_for_unit(&self, unit_id: &str) -> Result<Vec<PendingFieldUpdate>, StorageError> {
        let records = self
            .store()
            .await?
            .query_by_index(Collection::PendingUpdates, Index::UnitId, &unit_id.into())
            .await?;

        Ok(QueueRead::<PendingFieldUpdate>::decode_all(Collection::PendingUpdates, records)
            .entries
            .into_iter()
            .filter(|update| !update.synced)
            .collect())
    }

    /// Every unsynced field update, with undecodable records reported separately.
    pub async fn read_unsynced(&self) -> Result<QueueRead<PendingFieldUpdate>, StorageError> {
        let records = self
            .store()
            .await?
            .query_by_index(Collection::PendingUpdates, Index::Synced, &false.into())
            .await?;
        Ok(QueueRead::decode_all(Collection::PendingUpdates, records))
    }

    /// Every attachment not yet uploaded, with undecodable records reported separately.
    pub async fn read_unsynced_attachments(&self) -> Result<QueueRead<PendingAttachment>, StorageError> {
        let records = self
            .store()
            .await?
            .query_by_index(Collection::PendingAttachments, Index::Synced, &false.into())
            .await?;
        Ok(QueueRead::decode_all(Collection::PendingAttachments, records))
    }

    /// Every unsynced field update that decodes.
    pub async fn list_all_unsynced(&self) -> Result<Vec<PendingFieldUpdate>, StorageError> {
        Ok(self.read_unsynced().await?.entries)
    }

    /// Every attachment not yet uploaded that decodes.
    pub async fn list_all_unsynced_attachments(&self) -> Result<Vec<PendingAttachment>, StorageError> {
        Ok(self.read_unsynced_attachments().await?.entries)
    }

    /// Confirm exactly the given revisions. Entries re-edited since the
    /// receipt was issued are left unsynced. Returns how many were flipped.
    pub async fn mark_synced(&self, receipts: &[SyncReceipt]) -> Result<usize, StorageError> {
        if receipts.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let store = self.store().await?;
        let mut confirmed = Vec::with_capacity(receipts.len());

        for receipt in receipts {
            let key = receipt.key.storage_key();
            let Some(record) = store.get(Collection::PendingUpdates, &key).await? else {
                continue;
            };
            let mut update: PendingFieldUpdate = match decode(Collection::PendingUpdates, record) {
                Ok(update) => update,
                Err(e) => {
                    warn!(key = %receipt.key, error = %e, "Receipt target no longer decodes, left as is");
                    continue;
                }
            };

            if update.synced {
                continue;
            }
            if update.revision != receipt.revision {
                debug!(key = %receipt.key, "Entry re-edited during sync, left pending");
                continue;
            }

            update.synced = true;
            let value = encode(Collection::PendingUpdates, &key, &update)?;
            confirmed.push(StoredRecord::new(key, value));
        }

        store.put_batch(Collection::PendingUpdates, confirmed).await
    }

    /// Fetch attachment metadata.
    pub async fn attachment(&self, id: &AttachmentId) -> Result<Option<PendingAttachment>, StorageError> {
        self.store()
            .await?
            .get(Collection::PendingAttachments, id.as_str())
            .await?
            .map(|r| decode(Collection::PendingAttachments, r))
            .transpose()
    }

    /// Staged bytes, verified against the hash taken at capture time.
    ///
    /// `Ok(None)` once the attachment is uploaded (bytes are released then).
    pub async fn attachment_blob(&self, attachment: &PendingAttachment) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(record) = self
            .store()
            .await?
            .get(Collection::PendingAttachments, attachment.id.as_str())
            .await?
        else {
            return Ok(None);
        };
        let Some(blob) = record.blob else {
            return Ok(None);
        };

        let actual = hex::encode(Sha256::digest(&blob));
        if actual != attachment.sha256 {
            warn!(attachment_id = %attachment.id, "Staged attachment failed integrity check");
            return Err(StorageError::Corruption {
                id: attachment.id.to_string(),
                expected: attachment.sha256.clone(),
                actual,
            });
        }
        Ok(Some(blob))
    }

    /// Record a completed upload and release the staged bytes.
    pub async fn mark_attachment_uploaded(
        &self,
        id: &AttachmentId,
        address: RemoteAddress,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let store = self.store().await?;

        let Some(record) = store.get(Collection::PendingAttachments, id.as_str()).await? else {
            return Err(StorageError::Backend(format!("attachment {} vanished before confirmation", id)));
        };
        let mut attachment: PendingAttachment = decode(Collection::PendingAttachments, record)?;
        attachment.uploaded = true;
        attachment.remote_address = Some(address);

        let value = encode(Collection::PendingAttachments, id.as_str(), &attachment)?;
        store
            .put(Collection::PendingAttachments, StoredRecord::new(id.as_str(), value))
            .await
    }

    /// Remote address of an uploaded attachment.
    pub async fn uploaded_address(&self, id: &AttachmentId) -> Result<Option<RemoteAddress>, StorageError> {
        Ok(self
            .attachment(id)
            .await?
            .and_then(|a| a.address().cloned()))
    }

    /// Drop confirmed entries.
    ///
    /// Uploaded attachments are kept while their unit still has unsynced
    /// updates, which may reference them.
    pub async fn purge_synced(&self) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().await;
        let store = self.store().await?;
        let mut purged = 0;

        let synced = store
            .query_by_index(Collection::PendingUpdates, Index::Synced, &true.into())
            .await?;
        for record in synced {
            store.delete(Collection::PendingUpdates, &record.key).await?;
            purged += 1;
        }

        let busy_units: HashSet<String> = store
            .query_by_index(Collection::PendingUpdates, Index::Synced, &false.into())
            .await?
            .into_iter()
            .filter_map(|r| r.value.get("unit_id").and_then(Value::as_str).map(String::from))
            .collect();

        let uploaded = store
            .query_by_index(Collection::PendingAttachments, Index::Synced, &true.into())
            .await?;
        let uploaded = QueueRead::<PendingAttachment>::decode_all(Collection::PendingAttachments, uploaded);
        for attachment in uploaded.entries {
            if busy_units.contains(&attachment.unit_id) {
                continue;
            }
            store.delete(Collection::PendingAttachments, attachment.id.as_str()).await?;
            purged += 1;
        }

        if purged > 0 {
            info!(purged, "Purged confirmed queue entries");
        }
        Ok(purged)
    }

    /// Delete a staged attachment outright (user discarded the photo).
    pub async fn discard_attachment(&self, id: &AttachmentId) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.store()
            .await?
            .delete(Collection::PendingAttachments, id.as_str())
            .await
    }

    /// Drop a pending field update regardless of state.
    pub async fn discard_field_update(&self, key: &FieldKey) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.store()
            .await?
            .delete(Collection::PendingUpdates, &key.storage_key())
            .await
    }

    /// Counted in the store; no record bodies or staged bytes are loaded.
    pub async fn pending_counts(&self) -> Result<PendingCounts, StorageError> {
        let store = self.store().await?;
        let field_updates = store
            .count_by_index(Collection::PendingUpdates, Index::Synced, &false.into())
            .await?;
        let attachments = store
            .count_by_index(Collection::PendingAttachments, Index::Synced, &false.into())
            .await?;

        crate::metrics::set_pending_entries("field_update", field_updates);
        crate::metrics::set_pending_entries("attachment", attachments);
        Ok(PendingCounts {
            field_updates,
            attachments,
        })
    }
}
