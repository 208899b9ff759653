// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::traits::{RemoteError, RemoteStore};
use crate::record::{CompletionPayload, FieldMap, RemoteAddress};

/// In-process system of record with failure injection.
///
/// Backs the demo and the test suites. Unknown units fetch as empty maps,
/// the way a freshly scheduled inspection has no findings yet.
pub struct InMemoryRemote {
    base_url: String,
    units: RwLock<HashMap<String, FieldMap>>,
    blobs: DashMap<String, Vec<u8>>,
    completions: DashMap<String, (CompletionPayload, i64)>,
    reachable: AtomicBool,
    failing_paths: RwLock<Vec<String>>,
    failing_units: RwLock<HashSet<String>>,
    writes: AtomicUsize,
    uploads: AtomicUsize,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url("memory://remote")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            units: RwLock::new(HashMap::new()),
            blobs: DashMap::new(),
            completions: DashMap::new(),
            reachable: AtomicBool::new(true),
            failing_paths: RwLock::new(Vec::new()),
            failing_units: RwLock::new(HashSet::new()),
            writes: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    /// Make every call fail with `Unreachable` (or stop doing so).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Fail uploads whose path contains `fragment`.
    pub fn fail_uploads_matching(&self, fragment: impl Into<String>) {
        self.failing_paths.write().push(fragment.into());
    }

    /// Fail fetches and writes for one unit.
    pub fn fail_unit(&self, unit_id: impl Into<String>) {
        self.failing_units.write().insert(unit_id.into());
    }

    pub fn clear_failures(&self) {
        self.failing_paths.write().clear();
        self.failing_units.write().clear();
    }

    /// Simulate an edit made by someone else (e.g. an admin).
    pub fn set_field(&self, unit_id: &str, field_id: &str, value: serde_json::Value) {
        self.units
            .write()
            .entry(unit_id.to_string())
            .or_default()
            .insert(field_id.to_string(), value);
    }

    /// Current remote state of a unit.
    #[must_use]
    pub fn unit(&self, unit_id: &str) -> Option<FieldMap> {
        self.units.read().get(unit_id).cloned()
    }

    #[must_use]
    pub fn blob_at(&self, address: &RemoteAddress) -> Option<Vec<u8>> {
        self.blobs.get(&address.0).map(|b| b.value().clone())
    }

    #[must_use]
    pub fn completion(&self, unit_id: &str) -> Option<CompletionPayload> {
        self.completions.get(unit_id).map(|c| c.value().0.clone())
    }

    /// Number of successful unit writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }

    /// Number of successful uploads so far.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::Acquire)
    }

    fn check_reachable(&self) -> Result<(), RemoteError> {
        if self.reachable.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RemoteError::Unreachable("network down".to_string()))
        }
    }

    fn check_unit(&self, unit_id: &str) -> Result<(), RemoteError> {
        if self.failing_units.read().contains(unit_id) {
            return Err(RemoteError::Rejected {
                status: 503,
                message: format!("unit {} temporarily unavailable", unit_id),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn fetch_unit_fields(&self, unit_id: &str) -> Result<FieldMap, RemoteError> {
        self.check_reachable()?;
        self.check_unit(unit_id)?;
        Ok(self.units.read().get(unit_id).cloned().unwrap_or_default())
    }

    async fn write_unit_fields(&self, unit_id: &str, fields: &FieldMap) -> Result<(), RemoteError> {
        self.check_reachable()?;
        self.check_unit(unit_id)?;
        self.units.write().insert(unit_id.to_string(), fields.clone());
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn upload_binary(&self, path: &str, blob: &[u8]) -> Result<RemoteAddress, RemoteError> {
        self.check_reachable()?;
        if self.failing_paths.read().iter().any(|f| path.contains(f.as_str())) {
            return Err(RemoteError::Rejected {
                status: 500,
                message: format!("upload of {} failed", path),
            });
        }

        let address = format!("{}/{}", self.base_url, path);
        self.blobs.insert(address.clone(), blob.to_vec());
        self.uploads.fetch_add(1, Ordering::AcqRel);
        Ok(RemoteAddress(address))
    }

    async fn complete_unit(
        &self,
        unit_id: &str,
        completion: &CompletionPayload,
        completed_at: i64,
    ) -> Result<(), RemoteError> {
        self.check_reachable()?;
        self.check_unit(unit_id)?;
        self.completions
            .insert(unit_id.to_string(), (completion.clone(), completed_at));
        Ok(())
    }
}
