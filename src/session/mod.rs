//! Session Store (C1)
//!
//! Durable-for-the-upload's-lifetime mapping `upload_id -> SessionRecord`,
//! plus a secondary `file_hash -> upload_id` index for resumability. The
//! store intentionally offers no compare-and-swap: the ingest endpoint
//! (`crate::ingest`) is responsible for its own read-modify-write safety.

mod store;
mod types;

pub use store::{mark_chunk_received, InMemorySessionStore, SessionStore};
pub use types::{FileInfo, SessionRecord};
