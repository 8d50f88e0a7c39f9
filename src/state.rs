//! Application state shared across the ingest router.

use std::sync::Arc;

use crate::auth::SignatureGate;
use crate::chunk::ChunkWriter;
use crate::config::Config;
use crate::session::SessionStore;

/// Shared application state, cheap to clone (everything behind an `Arc`).
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    session_store: Arc<dyn SessionStore>,
    chunk_writer: ChunkWriter,
    gate: Arc<dyn SignatureGate>,
}

impl AppState {
    pub fn new(
        config: Config,
        session_store: Arc<dyn SessionStore>,
        chunk_writer: ChunkWriter,
        gate: Arc<dyn SignatureGate>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                session_store,
                chunk_writer,
                gate,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.session_store
    }

    pub fn chunk_writer(&self) -> &ChunkWriter {
        &self.inner.chunk_writer
    }

    pub fn gate(&self) -> &Arc<dyn SignatureGate> {
        &self.inner.gate
    }
}
