// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record types held by the local store.
//!
//! Domain payloads are opaque JSON. A unit of work's field values are a
//! [`FieldMap`], ordered by field id so merged writes are deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field id → value for one unit of work.
pub type FieldMap = BTreeMap<String, Value>;

/// Prefix of an attachment reference stored in a field payload before upload.
pub const ATTACHMENT_REF_PREFIX: &str = "local-attachment://";

/// A cached read-through payload with its expiry window.
///
/// # Example
///
/// ```
/// use inspection_sync::CachedRecord;
///
/// let record = CachedRecord::new("unit-7".to_string(), "payload", 1_000, 500);
/// assert!(record.is_fresh(1_499));
/// assert!(record.is_expired(1_500));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord<T> {
    pub unit_id: String,
    pub payload: T,
    /// When the payload was cached (epoch millis)
    pub cached_at: i64,
    /// First instant the payload is no longer valid (epoch millis)
    pub expires_at: i64,
}

impl<T> CachedRecord<T> {
    pub fn new(unit_id: String, payload: T, cached_at: i64, ttl_millis: i64) -> Self {
        Self {
            unit_id,
            payload,
            cached_at,
            expires_at: cached_at.saturating_add(ttl_millis),
        }
    }

    /// Expired iff `now >= expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn is_fresh(&self, now: i64) -> bool {
        !self.is_expired(now)
    }
}

/// Composite key of a pending field update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub unit_id: String,
    pub field_id: String,
}

impl FieldKey {
    pub fn new(unit_id: impl Into<String>, field_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            field_id: field_id.into(),
        }
    }

    /// Store key: `{unit_id byte length}:{unit_id}/{field_id}`.
    ///
    /// The length prefix keeps ids containing `/` apart, so
    /// `("site/a", "roof")` and `("site", "a/roof")` never share a key.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}:{}/{}", self.unit_id.len(), self.unit_id, self.field_id)
    }
}

impl std::fmt::Display for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.unit_id, self.field_id)
    }
}

/// A locally recorded field value awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingFieldUpdate {
    pub unit_id: String,
    pub field_id: String,
    pub payload: Value,
    pub created_at: i64,
    /// Stamped fresh on every enqueue; guards `mark_synced` against later edits
    pub revision: String,
    pub synced: bool,
}

impl PendingFieldUpdate {
    #[must_use]
    pub fn key(&self) -> FieldKey {
        FieldKey::new(self.unit_id.clone(), self.field_id.clone())
    }

    /// Receipt that confirms exactly this revision.
    #[must_use]
    pub fn receipt(&self) -> SyncReceipt {
        SyncReceipt {
            key: self.key(),
            revision: self.revision.clone(),
        }
    }
}

/// What a sync run hands back to the queue once a write is confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReceipt {
    pub key: FieldKey,
    pub revision: String,
}

/// Locally generated attachment identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(pub String);

impl AttachmentId {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Token a field payload can carry until the upload resolves it.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}{}", ATTACHMENT_REF_PREFIX, self.0)
    }

    /// Parse a reference token back into an id.
    #[must_use]
    pub fn from_reference(token: &str) -> Option<Self> {
        token
            .strip_prefix(ATTACHMENT_REF_PREFIX)
            .filter(|id| !id.is_empty())
            .map(|id| Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote location of an uploaded binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteAddress(pub String);

impl std::fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata of a staged binary. The bytes live beside it in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAttachment {
    pub id: AttachmentId,
    pub unit_id: String,
    pub field_id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Hex SHA-256 of the bytes at capture time
    pub sha256: String,
    pub size_bytes: usize,
    pub created_at: i64,
    pub uploaded: bool,
    /// Only meaningful when `uploaded`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<RemoteAddress>,
}

impl PendingAttachment {
    /// Remote address, if and only if the upload completed.
    #[must_use]
    pub fn address(&self) -> Option<&RemoteAddress> {
        if self.uploaded {
            self.remote_address.as_ref()
        } else {
            None
        }
    }
}

/// Terminal-state payload of a unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionPayload {
    pub classification: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// A close-out action. Never queued: it is built and sent while online.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCompletion {
    pub unit_id: String,
    pub payload: CompletionPayload,
    pub completed_at: i64,
    pub synced: bool,
}
