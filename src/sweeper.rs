//! Background TTL sweeper.
//!
//! Chunked uploads abandoned mid-flight otherwise leak a session record and
//! a sparse temp file forever. A periodic task is the simplest fix that
//! doesn't require the store to support active expiry notifications.

use std::time::Duration;

use crate::chunk::ChunkWriter;
use crate::session::SessionStore;
use std::sync::Arc;

/// Spawns the sweeper on the current runtime and returns its handle. Callers
/// typically let it run for the lifetime of the process and abort it on
/// shutdown.
pub fn spawn(
    store: Arc<dyn SessionStore>,
    writer: ChunkWriter,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sweep_once(store.as_ref(), &writer).await;
        }
    })
}

async fn sweep_once(store: &dyn SessionStore, writer: &ChunkWriter) {
    for upload_id in store.expired_ids().await {
        if let Some(record) = store.get(&upload_id).await {
            let ext = std::path::Path::new(&record.file_info.name)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string();
            writer.cleanup(&upload_id, &ext).await;
        }
        store.delete(&upload_id).await;
        tracing::debug!(upload_id, "swept expired upload session");
    }
}
