// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{CompletionPayload, FieldMap, RemoteAddress};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote unreachable: {0}")]
    Unreachable(String),
    #[error("Remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Remote has no unit '{0}'")]
    NotFound(String),
}

impl RemoteError {
    /// Whether retrying the same call could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::NotFound(_) => false,
        }
    }
}

/// The system of record, reachable only when online.
///
/// No transactional semantics are assumed beyond single-call success or failure.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Current field values of a unit.
    async fn fetch_unit_fields(&self, unit_id: &str) -> Result<FieldMap, RemoteError>;

    /// Replace a unit's field values.
    async fn write_unit_fields(&self, unit_id: &str, fields: &FieldMap) -> Result<(), RemoteError>;

    /// Store a binary at `path` and return where it can be reached.
    async fn upload_binary(&self, path: &str, blob: &[u8]) -> Result<RemoteAddress, RemoteError>;

    /// Move a unit into its terminal state.
    async fn complete_unit(
        &self,
        unit_id: &str,
        completion: &CompletionPayload,
        completed_at: i64,
    ) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Unreachable("timeout".into()).is_transient());
        assert!(RemoteError::Rejected { status: 503, message: String::new() }.is_transient());
        assert!(RemoteError::Rejected { status: 429, message: String::new() }.is_transient());
        assert!(!RemoteError::Rejected { status: 400, message: String::new() }.is_transient());
        assert!(!RemoteError::NotFound("u1".into()).is_transient());
    }
}
