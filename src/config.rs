// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the inspection sync engine.
//!
//! # Example
//!
//! ```
//! use inspection_sync::EngineConfig;
//!
//! // Minimal config (in-memory store, 24h cache TTL)
//! let config = EngineConfig::default();
//! assert_eq!(config.cache_ttl_secs, 24 * 60 * 60);
//! assert!(config.store_path.is_none());
//!
//! // On-device store with a shorter TTL
//! let config = EngineConfig {
//!     store_path: Some("./inspections.db".into()),
//!     cache_ttl_secs: 6 * 60 * 60,
//!     ..Default::default()
//! };
//! assert_eq!(config.cache_ttl().as_secs(), 21_600);
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::resilience::retry::RetryConfig;

/// Configuration for the engine.
///
/// All fields have defaults. Set `store_path` to persist pending work
/// across restarts; without it everything lives in memory.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// SQLite file for the local store (None = in-memory store)
    #[serde(default)]
    pub store_path: Option<String>,

    /// Time-to-live of cached unit snapshots in seconds (default: 24h)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Remote path prefix for uploaded attachments
    #[serde(default = "default_attachment_path_prefix")]
    pub attachment_path_prefix: String,

    /// Remote call retry settings
    #[serde(default = "default_remote_max_retries")]
    pub remote_max_retries: usize,
    #[serde(default = "default_remote_retry_initial_ms")]
    pub remote_retry_initial_ms: u64,
    #[serde(default = "default_remote_retry_max_ms")]
    pub remote_retry_max_ms: u64,

    /// Run a sync after each local write when online
    #[serde(default = "default_opportunistic_sync")]
    pub opportunistic_sync: bool,

    /// Drop synced entries from the queue after a clean sync
    #[serde(default)]
    pub purge_synced_on_success: bool,

    /// Tag used when registering with the host's background scheduler
    #[serde(default = "default_background_sync_tag")]
    pub background_sync_tag: String,
}

fn default_cache_ttl_secs() -> u64 { 24 * 60 * 60 }
fn default_attachment_path_prefix() -> String { "inspection-photos".to_string() }
fn default_remote_max_retries() -> usize { 3 }
fn default_remote_retry_initial_ms() -> u64 { 100 }
fn default_remote_retry_max_ms() -> u64 { 2_000 }
fn default_opportunistic_sync() -> bool { true }
fn default_background_sync_tag() -> String { "inspection-sync".to_string() }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            attachment_path_prefix: default_attachment_path_prefix(),
            remote_max_retries: default_remote_max_retries(),
            remote_retry_initial_ms: default_remote_retry_initial_ms(),
            remote_retry_max_ms: default_remote_retry_max_ms(),
            opportunistic_sync: default_opportunistic_sync(),
            purge_synced_on_success: false,
            background_sync_tag: default_background_sync_tag(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Retry policy applied to every remote call made during sync.
    #[must_use]
    pub fn remote_retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: Some(self.remote_max_retries.max(1)),
            initial_delay: Duration::from_millis(self.remote_retry_initial_ms),
            max_delay: Duration::from_millis(self.remote_retry_max_ms),
            factor: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.attachment_path_prefix, "inspection-photos");
        assert!(config.opportunistic_sync);
        assert!(!config.purge_synced_on_success);
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"store_path": "/data/field.db", "cache_ttl_secs": 60}"#,
        )
        .unwrap();

        assert_eq!(config.store_path.as_deref(), Some("/data/field.db"));
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.remote_max_retries, 3);
        assert_eq!(config.background_sync_tag, "inspection-sync");
    }

    #[test]
    fn test_remote_retry_never_zero_attempts() {
        let config = EngineConfig {
            remote_max_retries: 0,
            ..Default::default()
        };
        assert_eq!(config.remote_retry().max_retries, Some(1));
    }
}
