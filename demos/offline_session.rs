// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! A field session that loses and regains connectivity.
//!
//! Run with: `RUST_LOG=inspection_sync=debug cargo run --example offline_session`

use std::sync::Arc;

use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use inspection_sync::{
    CompletionPayload, ConnectivityMonitor, EngineConfig, EngineError, InMemoryRemote,
    InspectionEngine,
};

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let dir = std::env::temp_dir().join(format!("inspection-demo-{}", uuid::Uuid::new_v4()));
    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!("cannot create {}: {}", dir.display(), e);
        return Ok(());
    }

    let config = EngineConfig {
        store_path: Some(dir.join("field.db").to_string_lossy().to_string()),
        ..Default::default()
    };
    let remote = Arc::new(InMemoryRemote::with_base_url("https://files.example"));
    remote.set_field("insp-100", "roof", json!("not inspected"));
    remote.set_field("insp-100", "walls", json!("not inspected"));

    let connectivity = Arc::new(ConnectivityMonitor::new(true));
    let engine = InspectionEngine::new(config, remote.clone(), connectivity.clone());

    let host = engine.connectivity_wake_host();
    engine.set_background_host(host.clone());
    info!(registered = engine.try_register_background(), "Background sync");

    // Arrive on site with coverage; the unit is cached
    let view = engine.read_unit("insp-100").await?;
    info!(source = ?view.source, fields = ?view.fields, "Opened inspection");

    // Coverage drops in the basement
    connectivity.set_online(false);
    engine
        .record_field_update("insp-100", "walls", json!("rising damp, north wall"))
        .await?;
    let photo = engine
        .record_attachment("insp-100", "photos", vec![0xFF, 0xD8, 0xFF, 0xE0], "north-wall.jpg")
        .await?;
    engine
        .record_field_update("insp-100", "photos", json!([photo.reference()]))
        .await?;

    let view = engine.read_unit("insp-100").await?;
    info!(pending = ?view.pending_fields, "Working offline");

    if let Err(e) = engine.complete_unit("insp-100", completion()).await {
        info!(error = %e, "Completion refused");
    }

    // Back upstairs: the wake host syncs in the background
    connectivity.set_online(true);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!(counts = ?engine.pending_counts().await?, "After reconnect");

    let done = engine.complete_unit("insp-100", completion()).await?;
    info!(completed_at = done.completed_at, "Inspection completed");
    info!(remote = ?remote.unit("insp-100"), "Remote state");

    host.disarm();
    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

fn completion() -> CompletionPayload {
    CompletionPayload {
        classification: "action-required".into(),
        summary: "Damp treatment recommended".into(),
        details: None,
    }
}
