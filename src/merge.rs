// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Merge-on-read reconciliation.
//!
//! A unit's view is its last known remote (or cached) field values with
//! every unsynced local update laid over them. Pending always wins: a value
//! the inspector entered stays authoritative until the remote confirms it.
//! The same overlay is what the sync orchestrator writes back.
//!
//! Everything here is pure.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::record::{AttachmentId, FieldMap, PendingFieldUpdate, RemoteAddress};

/// Where the base field values of a view came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SnapshotSource {
    /// Fetched from the remote just now
    Remote,
    /// Fresh local cache (may lag the remote)
    Cache,
    /// No snapshot available; only local edits
    PendingOnly,
}

/// Base field values for a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub fields: FieldMap,
    pub source: SnapshotSource,
    /// Set when the snapshot came from cache
    pub cached_at: Option<i64>,
}

impl Snapshot {
    #[must_use]
    pub fn remote(fields: FieldMap) -> Self {
        Self {
            fields,
            source: SnapshotSource::Remote,
            cached_at: None,
        }
    }

    #[must_use]
    pub fn cached(fields: FieldMap, cached_at: i64) -> Self {
        Self {
            fields,
            source: SnapshotSource::Cache,
            cached_at: Some(cached_at),
        }
    }
}

/// What the UI renders for a unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedUnit {
    pub unit_id: String,
    pub fields: FieldMap,
    /// Fields whose value is a local, unconfirmed edit
    pub pending_fields: BTreeSet<String>,
    pub source: SnapshotSource,
    pub snapshot_cached_at: Option<i64>,
}

impl MergedUnit {
    /// Whether the view shows any unconfirmed edit.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending_fields.is_empty()
    }
}

/// Lay `pending` over `base`, field by field. Pending wins.
#[must_use]
pub fn overlay(base: &FieldMap, pending: &[PendingFieldUpdate]) -> FieldMap {
    let mut merged = base.clone();
    for update in pending {
        merged.insert(update.field_id.clone(), update.payload.clone());
    }
    merged
}

/// Build the view for `unit_id`. Synced entries and entries for other
/// units are ignored.
#[must_use]
pub fn merged_view(unit_id: &str, snapshot: Option<&Snapshot>, pending: &[PendingFieldUpdate]) -> MergedUnit {
    let relevant: Vec<PendingFieldUpdate> = pending
        .iter()
        .filter(|u| u.unit_id == unit_id && !u.synced)
        .cloned()
        .collect();

    let (base, source, snapshot_cached_at) = match snapshot {
        Some(s) => (s.fields.clone(), s.source, s.cached_at),
        None => (FieldMap::new(), SnapshotSource::PendingOnly, None),
    };

    MergedUnit {
        unit_id: unit_id.to_string(),
        fields: overlay(&base, &relevant),
        pending_fields: relevant.iter().map(|u| u.field_id.clone()).collect(),
        source,
        snapshot_cached_at,
    }
}

/// Replace every attachment reference token inside `value` with its remote
/// address. Fails with the first attachment that has no address yet.
pub fn resolve_attachment_refs<F>(value: &Value, lookup: &F) -> Result<Value, AttachmentId>
where
    F: Fn(&AttachmentId) -> Option<RemoteAddress>,
{
    match value {
        Value::String(s) => match AttachmentId::from_reference(s) {
            Some(id) => lookup(&id).map(|addr| Value::String(addr.0)).ok_or(id),
            None => Ok(value.clone()),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_attachment_refs(item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), resolve_attachment_refs(v, lookup)?);
            }
            Ok(Value::Object(resolved))
        }
        _ => Ok(value.clone()),
    }
}

/// Attachment ids referenced anywhere inside `value`.
#[must_use]
pub fn referenced_attachments(value: &Value) -> Vec<AttachmentId> {
    let mut found = Vec::new();
    collect_refs(value, &mut found);
    found
}

fn collect_refs(value: &Value, found: &mut Vec<AttachmentId>) {
    match value {
        Value::String(s) => found.extend(AttachmentId::from_reference(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_refs(v, found)),
        _ => {}
    }
}
